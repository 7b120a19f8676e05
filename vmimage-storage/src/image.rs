use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info};
use vmimage_core::{
    DiskAttachment, DiskConfig, DriverFormat, ImageBackendConfig, ImageDescriptor, ImageLocation,
    ImageMeta, IoTune, Result, SourceType, VmImageError,
};

use crate::disk_info::DriverFormatStore;
use crate::driver::StorageDriver;
use crate::fetch::{FetchTemplate, SynchronizedFetch};
use crate::lock::CacheCoordinator;
use crate::utils::DiskUtils;

/// Everything an image object needs from its surroundings. Cheap to clone;
/// one context is shared by all images a registry hands out.
#[derive(Clone)]
pub struct ImageContext {
    pub config: Arc<ImageBackendConfig>,
    pub utils: Arc<dyn DiskUtils>,
    pub locks: CacheCoordinator,
    pub storage_driver: Option<Arc<dyn StorageDriver>>,
    /// Result of the preallocation probe, taken once by whoever builds the
    /// context.
    pub can_fallocate: bool,
}

impl ImageContext {
    pub fn new(config: ImageBackendConfig, utils: Arc<dyn DiskUtils>) -> Self {
        Self {
            config: Arc::new(config),
            utils,
            locks: CacheCoordinator::new(),
            storage_driver: None,
            can_fallocate: false,
        }
    }

    pub fn with_storage_driver(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.storage_driver = Some(driver);
        self
    }

    pub fn with_fallocate(mut self, can_fallocate: bool) -> Self {
        self.can_fallocate = can_fallocate;
        self
    }

    /// Runs the preallocation probe under the instances directory.
    pub async fn detect_fallocate(mut self) -> Self {
        let dir = self.config.instances_path.clone();
        self.can_fallocate = fs::create_dir_all(&dir).await.is_ok()
            && self.utils.can_fallocate(&dir).await;
        self
    }
}

/// What an image object is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageTarget {
    /// A disk of an instance, e.g. ("8bee4eaf-…", "disk").
    Disk { instance: String, disk_name: String },
    /// An existing backend locator, used to extract snapshots.
    Path(String),
}

impl ImageTarget {
    pub fn disk(instance: &str, disk_name: &str) -> Self {
        ImageTarget::Disk {
            instance: instance.to_string(),
            disk_name: disk_name.to_string(),
        }
    }
}

/// A VM disk on some storage backend.
///
/// Backends provide `descriptor`, `context` and their own `create_image`;
/// the caching protocol, size checks and driver format resolution are
/// shared.
#[async_trait]
pub trait Image: Send + Sync {
    fn descriptor(&self) -> &ImageDescriptor;

    fn context(&self) -> &ImageContext;

    fn path(&self) -> &str {
        &self.descriptor().path
    }

    /// Materialize this disk from the base image at `base`, fetching the
    /// base through `prepare_template` when needed.
    async fn create_image(
        &self,
        _prepare_template: &dyn FetchTemplate,
        _base: &Path,
        _size: Option<u64>,
    ) -> Result<()> {
        Err(VmImageError::NotImplemented(
            "create_image() has no default".to_string(),
        ))
    }

    async fn check_image_exists(&self) -> Result<bool> {
        Ok(fs::try_exists(self.path()).await?)
    }

    /// Creates this disk from the base image `filename`, fetching the base
    /// at most once across every process sharing the lock directory.
    async fn cache(
        &self,
        fetch_func: &dyn FetchTemplate,
        filename: &str,
        size: Option<u64>,
    ) -> Result<()> {
        let context = self.context();
        let base_dir = context.config.base_dir();
        if !fs::try_exists(&base_dir).await? {
            fs::create_dir_all(&base_dir).await?;
        }
        let base = base_dir.join(filename);
        let size = requested_size(size);

        let fetch = SynchronizedFetch::new(
            fetch_func,
            &context.locks,
            filename,
            &self.descriptor().lock_directory,
        );

        if !self.check_image_exists().await? || !fs::try_exists(&base).await? {
            self.create_image(&fetch, &base, size).await?;
        } else {
            debug!("Disk {} and base {} already exist", self.path(), filename);
        }

        if let Some(size) = size {
            if self.descriptor().preallocate && self.can_fallocate() && is_writable(self.path()) {
                info!("Preallocating {} bytes for {}", size, self.path());
                context.utils.fallocate(Path::new(self.path()), size).await?;
            }
        }

        Ok(())
    }

    fn can_fallocate(&self) -> bool {
        self.context().can_fallocate
    }

    /// Images cannot generally be shrunk, so the requested size must hold
    /// the base image's virtual size. A `base_size` of zero is looked up.
    async fn verify_base_size(
        &self,
        base: &Path,
        size: Option<u64>,
        base_size: u64,
    ) -> Result<()> {
        let Some(size) = requested_size(size) else {
            return Ok(());
        };

        let base_size = if base_size == 0 {
            self.get_disk_size(base).await?
        } else {
            base_size
        };

        if size < base_size {
            error!(
                "{} virtual size {} larger than requested disk size {}",
                base.display(),
                base_size,
                size
            );
            return Err(VmImageError::SizeConflict {
                base: base.to_path_buf(),
                base_size,
                size,
            });
        }

        Ok(())
    }

    async fn get_disk_size(&self, name: &Path) -> Result<u64> {
        self.context().utils.disk_size(name).await
    }

    async fn snapshot_extract(&self, _target: &Path, _out_format: &DriverFormat) -> Result<()> {
        Err(VmImageError::NotImplemented(
            "snapshot_extract() is not supported by this backend".to_string(),
        ))
    }

    /// Format this backend would report for a fresh disk.
    async fn get_driver_format(&self) -> Result<DriverFormat> {
        Ok(self.descriptor().driver_format.clone())
    }

    /// Returns the recorded driver format of this disk, recording the
    /// backend's answer on first use when a disk info path is configured.
    async fn resolve_driver_format(&self) -> Result<DriverFormat> {
        let descriptor = self.descriptor();
        let Some(store_path) = &descriptor.disk_info_path else {
            return self.get_driver_format().await;
        };

        let store = DriverFormatStore::new(store_path.clone(), self.context().locks.clone());
        if let Some(format) = store.lookup(&descriptor.path).await? {
            return Ok(format);
        }

        let format = self.get_driver_format().await?;
        store.record(&descriptor.path, &format).await?;
        Ok(format)
    }

    /// True when disks live on storage shared by all compute hosts.
    fn is_shared_block_storage(&self) -> bool {
        false
    }

    /// Create this disk straight from one of the image's locations.
    async fn direct_fetch(
        &self,
        image_id: &str,
        _image_meta: &ImageMeta,
        _image_locations: &[ImageLocation],
    ) -> Result<()> {
        Err(VmImageError::unsupported(
            image_id,
            "direct_fetch() is not implemented",
        ))
    }

    /// Describe this disk for the hypervisor.
    async fn disk_config(&self, attachment: &DiskAttachment) -> Result<DiskConfig> {
        let descriptor = self.descriptor();

        let iotune = match descriptor.source_type {
            SourceType::File | SourceType::Block => {
                IoTune::from_extra_specs(&attachment.extra_specs)?
            }
            SourceType::Network => IoTune::default(),
        };

        Ok(DiskConfig {
            source_type: Some(descriptor.source_type),
            source_device: attachment.device_type.clone(),
            source_path: Some(descriptor.path.clone()),
            driver_name: Some("qemu".to_string()),
            driver_format: Some(descriptor.driver_format.clone()),
            driver_cache: attachment.cache_mode.clone(),
            target_bus: attachment.disk_bus.clone(),
            target_dev: attachment.disk_dev.clone(),
            iotune,
            ..Default::default()
        })
    }
}

/// A size of zero means "as large as the base image".
pub(crate) fn requested_size(size: Option<u64>) -> Option<u64> {
    size.filter(|size| *size > 0)
}

fn is_writable(path: &str) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::W_OK).is_ok()
}

/// `disk.info` next to a disk path.
pub(crate) fn disk_info_path_for(disk_path: &Path) -> Option<PathBuf> {
    disk_path.parent().map(|dir| dir.join("disk.info"))
}
