//! `StorageDriver` talking to the cluster through the `rbd` and `ceph`
//! command line tools.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};
use vmimage_core::{ImageLocation, ImageMeta, PoolInfo, RbdConfig, Result, VmImageError};

use crate::driver::{RbdLocation, StorageDriver};
use crate::utils::command_output;

#[derive(Debug, Clone)]
pub struct RbdCommandDriver {
    pool: String,
    ceph_conf: Option<PathBuf>,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RbdInfo {
    size: u64,
}

#[derive(Debug, Deserialize)]
struct MonDump {
    mons: Vec<MonEntry>,
}

#[derive(Debug, Deserialize)]
struct MonEntry {
    addr: Option<String>,
    public_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CephDf {
    stats: CephDfStats,
}

#[derive(Debug, Deserialize)]
struct CephDfStats {
    total_bytes: u64,
    total_used_bytes: u64,
    total_avail_bytes: u64,
}

/// Splits a monitor address such as `10.0.0.1:6789/0` or
/// `[2001:db8::1]:6789/0` into host and port.
fn split_mon_addr(addr: &str) -> Option<(String, String)> {
    let addr = addr.split('/').next()?;
    let (host, port) = addr.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || port.is_empty() {
        return None;
    }
    Some((host.to_string(), port.to_string()))
}

fn is_not_found(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains("No such file or directory")
}

impl RbdCommandDriver {
    pub fn new(config: &RbdConfig) -> Self {
        Self {
            pool: config.pool.clone(),
            ceph_conf: config.ceph_conf.clone(),
            user: config.user.clone(),
        }
    }

    async fn call(&self, program: &str, operation: &str, args: Vec<String>) -> Result<Vec<u8>> {
        let mut full = args;
        full.extend(self.ceph_args());

        let output = command_output(program, &full).await?;
        if !output.status.success() {
            return Err(VmImageError::driver(
                operation,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(output.stdout)
    }

    async fn cluster_fsid(&self) -> Result<String> {
        let stdout = self.call("ceph", "fsid", vec!["fsid".to_string()]).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    async fn image_spec_exists(&self, spec: &str) -> Result<bool> {
        let mut args = vec![
            "info".to_string(),
            spec.to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        args.extend(self.ceph_args());

        let output = command_output("rbd", &args).await?;
        if output.status.success() {
            Ok(true)
        } else if is_not_found(&output.stderr) {
            Ok(false)
        } else {
            Err(VmImageError::driver(
                "exists",
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }

    async fn check_cloneable(&self, location: &ImageLocation, meta: &ImageMeta) -> Result<bool> {
        let parsed = RbdLocation::parse(&location.url)?;

        if parsed.fsid != self.cluster_fsid().await? {
            debug!("{} is in a different cluster", location.url);
            return Ok(false);
        }

        if meta.disk_format.as_deref() != Some("raw") {
            debug!("{} is not a raw image", location.url);
            return Ok(false);
        }

        self.image_spec_exists(&parsed.snapshot_spec()).await
    }

    fn spec(&self, name: &str) -> String {
        format!("{}/{}", self.pool, name)
    }
}

#[async_trait]
impl StorageDriver for RbdCommandDriver {
    async fn exists(&self, name: &str) -> Result<bool> {
        self.image_spec_exists(&self.spec(name)).await
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let stdout = self
            .call(
                "rbd",
                "size",
                vec![
                    "info".to_string(),
                    self.spec(name),
                    "--format".to_string(),
                    "json".to_string(),
                ],
            )
            .await?;

        let info: RbdInfo = serde_json::from_slice(&stdout)?;
        Ok(info.size)
    }

    async fn resize(&self, name: &str, size: u64) -> Result<()> {
        // The tool takes MiB; round up so the object never ends up smaller.
        let size_mb = size.div_ceil(1024 * 1024);
        info!("Resizing {} to {}M", self.spec(name), size_mb);
        self.call(
            "rbd",
            "resize",
            vec![
                "resize".to_string(),
                self.spec(name),
                "--size".to_string(),
                format!("{size_mb}M"),
            ],
        )
        .await?;
        Ok(())
    }

    async fn supports_layering(&self) -> Result<bool> {
        let output = command_output("rbd", &["help".to_string(), "clone".to_string()]).await?;
        Ok(output.status.success())
    }

    async fn is_cloneable(&self, location: &ImageLocation, meta: &ImageMeta) -> bool {
        match self.check_cloneable(location, meta).await {
            Ok(cloneable) => cloneable,
            Err(e) => {
                debug!("Cannot clone {}: {}", location.url, e);
                false
            }
        }
    }

    async fn clone_image(&self, location: &ImageLocation, name: &str) -> Result<()> {
        let parsed = RbdLocation::parse(&location.url)?;
        self.call(
            "rbd",
            "clone",
            vec![
                "clone".to_string(),
                parsed.snapshot_spec(),
                self.spec(name),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_mon_addrs(&self) -> Result<(Vec<String>, Vec<String>)> {
        let stdout = self
            .call(
                "ceph",
                "mon dump",
                vec![
                    "mon".to_string(),
                    "dump".to_string(),
                    "--format".to_string(),
                    "json".to_string(),
                ],
            )
            .await?;
        let dump: MonDump = serde_json::from_slice(&stdout)?;

        let mut hosts = Vec::new();
        let mut ports = Vec::new();
        for mon in dump.mons {
            let addr = mon
                .addr
                .or(mon.public_addr)
                .context("monitor entry without address")?;
            let (host, port) = split_mon_addr(&addr)
                .with_context(|| format!("unparsable monitor address {addr}"))?;
            hosts.push(host);
            ports.push(port);
        }

        Ok((hosts, ports))
    }

    fn ceph_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(user) = &self.user {
            args.extend(["--id".to_string(), user.clone()]);
        }
        if let Some(conf) = &self.ceph_conf {
            args.extend([
                "--conf".to_string(),
                conf.to_string_lossy().into_owned(),
            ]);
        }
        args
    }

    async fn get_pool_info(&self) -> Result<PoolInfo> {
        let stdout = self
            .call(
                "ceph",
                "df",
                vec!["df".to_string(), "--format".to_string(), "json".to_string()],
            )
            .await?;
        let df: CephDf = serde_json::from_slice(&stdout)?;

        Ok(PoolInfo {
            pool: self.pool.clone(),
            total_bytes: df.stats.total_bytes,
            used_bytes: df.stats.total_used_bytes,
            free_bytes: df.stats.total_avail_bytes,
        })
    }
}
