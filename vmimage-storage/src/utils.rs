use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, error};
use vmimage_core::{DriverFormat, Result, VmImageError};

/// Low level disk utilities the backends shell out to.
#[async_trait]
pub trait DiskUtils: Send + Sync {
    /// Virtual size of the image in bytes.
    async fn disk_size(&self, path: &Path) -> Result<u64>;
    async fn detect_format(&self, path: &Path) -> Result<DriverFormat>;
    /// `source` may be a local path or a backend locator such as
    /// `rbd:pool/name`.
    async fn convert_image(
        &self,
        source: &str,
        target: &Path,
        out_format: &DriverFormat,
    ) -> Result<()>;
    async fn create_cow_image(
        &self,
        backing: &Path,
        target: &Path,
        size: Option<u64>,
    ) -> Result<()>;
    /// Grow the image at `path` to `size` bytes.
    async fn extend(&self, path: &Path, size: u64) -> Result<()>;
    async fn create_lvm_volume(&self, vg: &str, lv: &str, size: u64, sparse: bool) -> Result<()>;
    /// Runs `rbd import` with the given arguments.
    async fn import_image(&self, args: &[String]) -> Result<()>;
    /// Reserve `size` bytes for `path` without writing zeroes.
    async fn fallocate(&self, path: &Path, size: u64) -> Result<()>;
    /// Probe whether space preallocation works under `dir`.
    async fn can_fallocate(&self, dir: &Path) -> bool;
}

pub(crate) async fn command_output(program: &str, args: &[String]) -> Result<Output> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output().await?;
    Ok(output)
}

pub(crate) async fn run(program: &str, args: &[String]) -> Result<Vec<u8>> {
    let output = command_output(program, args).await?;

    if !output.status.success() {
        return Err(VmImageError::StorageError(format!(
            "{program} {} failed: {}",
            args.first().map(String::as_str).unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output.stdout)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Deserialize)]
struct QemuImgInfo {
    #[serde(rename = "virtual-size")]
    virtual_size: u64,
    format: String,
}

/// `DiskUtils` backed by qemu-img, lvcreate, rbd and fallocate.
#[derive(Debug, Default, Clone)]
pub struct CommandDiskUtils;

impl CommandDiskUtils {
    pub fn new() -> Self {
        Self
    }

    async fn info(&self, path: &Path) -> Result<QemuImgInfo> {
        let stdout = run(
            "qemu-img",
            &[
                "info".to_string(),
                "--output=json".to_string(),
                path_arg(path),
            ],
        )
        .await?;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

#[async_trait]
impl DiskUtils for CommandDiskUtils {
    async fn disk_size(&self, path: &Path) -> Result<u64> {
        Ok(self.info(path).await?.virtual_size)
    }

    async fn detect_format(&self, path: &Path) -> Result<DriverFormat> {
        Ok(DriverFormat::from(self.info(path).await?.format))
    }

    async fn convert_image(
        &self,
        source: &str,
        target: &Path,
        out_format: &DriverFormat,
    ) -> Result<()> {
        run(
            "qemu-img",
            &[
                "convert".to_string(),
                "-O".to_string(),
                out_format.to_string(),
                source.to_string(),
                path_arg(target),
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_cow_image(
        &self,
        backing: &Path,
        target: &Path,
        size: Option<u64>,
    ) -> Result<()> {
        let mut args = vec![
            "create".to_string(),
            "-f".to_string(),
            "qcow2".to_string(),
            "-o".to_string(),
            format!("backing_file={}", backing.display()),
            path_arg(target),
        ];
        if let Some(size) = size {
            args.push(size.to_string());
        }

        run("qemu-img", &args).await?;
        Ok(())
    }

    async fn extend(&self, path: &Path, size: u64) -> Result<()> {
        run(
            "qemu-img",
            &["resize".to_string(), path_arg(path), size.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn create_lvm_volume(&self, vg: &str, lv: &str, size: u64, sparse: bool) -> Result<()> {
        let mut args = vec!["-n".to_string(), lv.to_string()];
        if sparse {
            // Thin allocation: reserve a small extent, expose the full size.
            args.extend(["-L".to_string(), "64M".to_string()]);
            args.extend(["--virtualsize".to_string(), format!("{size}b")]);
        } else {
            args.extend(["-L".to_string(), format!("{size}b")]);
        }
        args.push(vg.to_string());

        run("lvcreate", &args).await?;
        Ok(())
    }

    async fn import_image(&self, args: &[String]) -> Result<()> {
        let mut full = vec!["import".to_string()];
        full.extend_from_slice(args);
        run("rbd", &full).await?;
        Ok(())
    }

    async fn fallocate(&self, path: &Path, size: u64) -> Result<()> {
        run(
            "fallocate",
            &[
                "-n".to_string(),
                "-l".to_string(),
                size.to_string(),
                path_arg(path),
            ],
        )
        .await?;
        Ok(())
    }

    async fn can_fallocate(&self, dir: &Path) -> bool {
        let probe = dir.join(".fallocate_test");
        let supported = self.fallocate(&probe, 1).await.is_ok();
        let _ = tokio::fs::remove_file(&probe).await;

        if !supported {
            error!("Unable to preallocate images at path: {}", dir.display());
        }
        supported
    }
}
