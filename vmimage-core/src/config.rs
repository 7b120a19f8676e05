use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings consumed by the image backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBackendConfig {
    /// Backend used when a caller does not name one: raw, qcow2, lvm, rbd or
    /// default. `default` picks qcow2 or raw depending on `use_cow_images`.
    pub images_type: String,
    pub use_cow_images: bool,
    pub instances_path: PathBuf,
    pub image_cache_subdirectory_name: String,
    pub preallocate_images: PreallocateMode,
    pub volume_group: Option<String>,
    pub sparse_logical_volumes: bool,
    pub rbd: RbdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RbdConfig {
    pub pool: String,
    pub ceph_conf: Option<PathBuf>,
    pub user: Option<String>,
    pub secret_uuid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreallocateMode {
    None,
    Space,
}

impl ImageBackendConfig {
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> crate::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: ImageBackendConfig = serde_yaml::from_str(&content)
                .map_err(|e| crate::VmImageError::ConfigError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, config_path: &Path) -> crate::Result<()> {
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(|e| crate::VmImageError::ConfigError(e.to_string()))?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    pub fn config_path() -> crate::Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            crate::VmImageError::ConfigError("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(".vmimage").join("config.yaml"))
    }

    /// Shared directory holding base images.
    pub fn base_dir(&self) -> PathBuf {
        self.instances_path
            .join(&self.image_cache_subdirectory_name)
    }

    /// Lock directory shared with the instance files, so that every compute
    /// node mounting them coordinates base image creation.
    pub fn lock_path(&self) -> PathBuf {
        self.instances_path.join("locks")
    }

    pub fn instance_dir(&self, instance: &str) -> PathBuf {
        self.instances_path.join(instance)
    }
}

impl Default for ImageBackendConfig {
    fn default() -> Self {
        Self {
            images_type: "default".to_string(),
            use_cow_images: true,
            instances_path: PathBuf::from("/var/lib/vmimage/instances"),
            image_cache_subdirectory_name: "_base".to_string(),
            preallocate_images: PreallocateMode::None,
            volume_group: None,
            sparse_logical_volumes: false,
            rbd: RbdConfig::default(),
        }
    }
}

impl Default for RbdConfig {
    fn default() -> Self {
        Self {
            pool: "rbd".to_string(),
            ceph_conf: None,
            user: None,
            secret_uuid: None,
        }
    }
}
