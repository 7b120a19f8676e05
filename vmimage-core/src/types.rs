use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{Result, VmImageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Block,
    Network,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::File => write!(f, "file"),
            SourceType::Block => write!(f, "block"),
            SourceType::Network => write!(f, "network"),
        }
    }
}

/// On-disk image format as understood by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DriverFormat {
    Raw,
    Qcow2,
    Rbd,
    Iso,
    Other(String),
}

impl DriverFormat {
    pub fn as_str(&self) -> &str {
        match self {
            DriverFormat::Raw => "raw",
            DriverFormat::Qcow2 => "qcow2",
            DriverFormat::Rbd => "rbd",
            DriverFormat::Iso => "iso",
            DriverFormat::Other(name) => name,
        }
    }
}

impl From<String> for DriverFormat {
    fn from(value: String) -> Self {
        match value.as_str() {
            "raw" => DriverFormat::Raw,
            "qcow2" => DriverFormat::Qcow2,
            "rbd" => DriverFormat::Rbd,
            "iso" => DriverFormat::Iso,
            _ => DriverFormat::Other(value),
        }
    }
}

impl From<&str> for DriverFormat {
    fn from(value: &str) -> Self {
        DriverFormat::from(value.to_string())
    }
}

impl From<DriverFormat> for String {
    fn from(value: DriverFormat) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for DriverFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-disk state owned by one image object.
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub source_type: SourceType,
    pub driver_format: DriverFormat,
    pub is_block_device: bool,
    pub preallocate: bool,
    /// Backend specific locator: a filesystem path for local backends, an
    /// `rbd:pool/name[:opts]` string for the network backend.
    pub path: String,
    pub lock_directory: PathBuf,
    /// Where the resolved driver format is persisted, if anywhere.
    pub disk_info_path: Option<PathBuf>,
}

impl ImageDescriptor {
    pub fn new(
        source_type: SourceType,
        driver_format: DriverFormat,
        path: String,
        lock_directory: PathBuf,
    ) -> Self {
        Self {
            source_type,
            driver_format,
            is_block_device: false,
            preallocate: false,
            path,
            lock_directory,
            disk_info_path: None,
        }
    }

    pub fn with_block_device(mut self, is_block_device: bool) -> Self {
        self.is_block_device = is_block_device;
        self
    }

    pub fn with_preallocate(mut self, preallocate: bool) -> Self {
        self.preallocate = preallocate;
        self
    }

    pub fn with_disk_info_path(mut self, disk_info_path: Option<PathBuf>) -> Self {
        self.disk_info_path = disk_info_path;
        self
    }
}

/// Image service metadata handed to `direct_fetch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMeta {
    pub disk_format: Option<String>,
    pub size: Option<u64>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// A location an image can be read from without going through the image
/// service, e.g. `rbd://fsid/pool/image/snap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLocation {
    pub url: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ImageLocation {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

/// What the hypervisor side asks for when attaching a disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskAttachment {
    pub disk_bus: String,
    pub disk_dev: String,
    pub device_type: String,
    pub cache_mode: String,
    #[serde(default)]
    pub extra_specs: HashMap<String, String>,
}

/// Disk description handed back to the hypervisor side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub source_type: Option<SourceType>,
    pub source_device: String,
    pub source_path: Option<String>,
    pub source_protocol: Option<String>,
    pub source_name: Option<String>,
    pub source_hosts: Vec<String>,
    pub source_ports: Vec<String>,
    pub driver_name: Option<String>,
    pub driver_format: Option<DriverFormat>,
    pub driver_cache: String,
    pub target_bus: String,
    pub target_dev: String,
    pub auth_username: Option<String>,
    pub auth_secret_type: Option<String>,
    pub auth_secret_uuid: Option<String>,
    pub iotune: IoTune,
}

/// Block I/O throttling limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoTune {
    pub disk_read_bytes_sec: Option<u64>,
    pub disk_read_iops_sec: Option<u64>,
    pub disk_write_bytes_sec: Option<u64>,
    pub disk_write_iops_sec: Option<u64>,
    pub disk_total_bytes_sec: Option<u64>,
    pub disk_total_iops_sec: Option<u64>,
}

impl IoTune {
    /// Picks `quota:<item>` entries out of instance-type extra specs.
    /// Unknown quota items are ignored.
    pub fn from_extra_specs(extra_specs: &HashMap<String, String>) -> Result<Self> {
        let mut tune = IoTune::default();

        for (key, value) in extra_specs {
            let Some(item) = key.strip_prefix("quota:") else {
                continue;
            };

            let slot = match item {
                "disk_read_bytes_sec" => &mut tune.disk_read_bytes_sec,
                "disk_read_iops_sec" => &mut tune.disk_read_iops_sec,
                "disk_write_bytes_sec" => &mut tune.disk_write_bytes_sec,
                "disk_write_iops_sec" => &mut tune.disk_write_iops_sec,
                "disk_total_bytes_sec" => &mut tune.disk_total_bytes_sec,
                "disk_total_iops_sec" => &mut tune.disk_total_iops_sec,
                _ => continue,
            };

            let parsed = value.trim().parse::<u64>().map_err(|_| {
                VmImageError::ConfigError(format!("Invalid value {value:?} for {key}"))
            })?;
            *slot = Some(parsed);
        }

        Ok(tune)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_format_string_forms() {
        assert_eq!(DriverFormat::from("qcow2"), DriverFormat::Qcow2);
        assert_eq!(
            DriverFormat::from("vmdk"),
            DriverFormat::Other("vmdk".to_string())
        );
        assert_eq!(DriverFormat::Rbd.to_string(), "rbd");

        let json = serde_json::to_string(&DriverFormat::Raw).unwrap();
        assert_eq!(json, "\"raw\"");
    }

    #[test]
    fn test_iotune_from_quota_specs() {
        let specs = HashMap::from([
            ("quota:disk_read_bytes_sec".to_string(), "10485760".to_string()),
            ("quota:disk_total_iops_sec".to_string(), "500".to_string()),
            ("quota:cpu_shares".to_string(), "2048".to_string()),
            ("hw:cpu_policy".to_string(), "dedicated".to_string()),
        ]);

        let tune = IoTune::from_extra_specs(&specs).unwrap();
        assert_eq!(tune.disk_read_bytes_sec, Some(10_485_760));
        assert_eq!(tune.disk_total_iops_sec, Some(500));
        assert_eq!(tune.disk_write_iops_sec, None);
    }

    #[test]
    fn test_iotune_rejects_garbage() {
        let specs = HashMap::from([(
            "quota:disk_write_iops_sec".to_string(),
            "fast".to_string(),
        )]);
        assert!(matches!(
            IoTune::from_extra_specs(&specs),
            Err(VmImageError::ConfigError(_))
        ));
    }
}
