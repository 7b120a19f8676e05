use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use vmimage_core::{
    DiskAttachment, DiskConfig, DriverFormat, ImageDescriptor, ImageLocation, ImageMeta, PoolInfo,
    Result, SourceType, VmImageError,
};

use crate::driver::StorageDriver;
use crate::fetch::FetchTemplate;
use crate::image::{Image, ImageContext, ImageTarget, requested_size};

/// Disk stored as an object in the remote block store.
///
/// The object lives in the configured pool and is named
/// `<instance>_<disk_name>`; existence and size checks go to the storage
/// driver instead of the local filesystem.
pub struct RbdImage {
    descriptor: ImageDescriptor,
    context: ImageContext,
    driver: Arc<dyn StorageDriver>,
    pool: String,
    rbd_name: String,
}

/// Object name out of a `[rbd:]pool/name[:options]` locator.
fn parse_locator(path: &str) -> Result<String> {
    let invalid = || VmImageError::InvalidLocator {
        path: path.to_string(),
    };

    let locator = path.strip_prefix("rbd:").unwrap_or(path);
    let (_, rest) = locator.split_once('/').ok_or_else(invalid)?;
    let name = rest.split(':').next().unwrap_or_default();
    if name.is_empty() {
        return Err(invalid());
    }

    Ok(name.to_string())
}

impl RbdImage {
    pub fn new(context: ImageContext, target: ImageTarget) -> Result<Self> {
        let rbd_name = match &target {
            ImageTarget::Path(path) => parse_locator(path)?,
            ImageTarget::Disk {
                instance,
                disk_name,
            } => format!("{instance}_{disk_name}"),
        };

        let rbd = &context.config.rbd;
        if rbd.pool.is_empty() {
            return Err(VmImageError::ConfigError(
                "You should specify rbd.pool to use rbd images".to_string(),
            ));
        }
        let driver = context.storage_driver.clone().ok_or_else(|| {
            VmImageError::ConfigError("rbd images need a storage driver".to_string())
        })?;

        let mut path = format!("rbd:{}/{}", rbd.pool, rbd_name);
        if let Some(user) = &rbd.user {
            path.push_str(&format!(":id={user}"));
        }
        if let Some(conf) = &rbd.ceph_conf {
            path.push_str(&format!(":conf={}", conf.display()));
        }

        let descriptor = ImageDescriptor::new(
            SourceType::Block,
            DriverFormat::Rbd,
            path,
            context.config.lock_path(),
        )
        .with_block_device(true);

        Ok(Self {
            descriptor,
            pool: rbd.pool.clone(),
            context,
            driver,
            rbd_name,
        })
    }

    pub fn rbd_name(&self) -> &str {
        &self.rbd_name
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub async fn pool_info(&self) -> Result<PoolInfo> {
        self.driver.get_pool_info().await
    }

    async fn import_base(&self, base: &Path) -> Result<()> {
        if !self.driver.supports_layering().await? {
            return Err(VmImageError::unsupported(
                &self.rbd_name,
                "storage driver does not support layering, refusing to import base image",
            ));
        }

        // The import tool detects zeroes and keeps the object sparse.
        let mut args = vec![
            "--pool".to_string(),
            self.pool.clone(),
            base.to_string_lossy().into_owned(),
            self.rbd_name.clone(),
            "--new-format".to_string(),
        ];
        args.extend(self.driver.ceph_args());

        info!(
            "Importing {} into {}/{}",
            base.display(),
            self.pool,
            self.rbd_name
        );
        self.context.utils.import_image(&args).await
    }
}

#[async_trait]
impl Image for RbdImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn context(&self) -> &ImageContext {
        &self.context
    }

    async fn check_image_exists(&self) -> Result<bool> {
        self.driver.exists(&self.rbd_name).await
    }

    /// Size of this disk's object. `name` is ignored: callers may pass a
    /// local path that does not exist.
    async fn get_disk_size(&self, _name: &Path) -> Result<u64> {
        self.driver.size(&self.rbd_name).await
    }

    async fn create_image(
        &self,
        prepare_template: &dyn FetchTemplate,
        base: &Path,
        size: Option<u64>,
    ) -> Result<()> {
        let size = requested_size(size);
        if !self.check_image_exists().await? {
            prepare_template.fetch(base, size).await?;
        } else {
            self.verify_base_size(base, size, 0).await?;
        }

        // The fetch may have cloned straight into the pool.
        if !self.check_image_exists().await? {
            self.import_base(base).await?;
        }

        if let Some(size) = size {
            let current = self.get_disk_size(base).await?;
            if size > current {
                info!(
                    "Resizing {}/{} from {} to {} bytes",
                    self.pool, self.rbd_name, current, size
                );
                self.driver.resize(&self.rbd_name, size).await?;
            }
        }

        Ok(())
    }

    fn can_fallocate(&self) -> bool {
        false
    }

    async fn snapshot_extract(&self, target: &Path, out_format: &DriverFormat) -> Result<()> {
        self.context
            .utils
            .convert_image(self.path(), target, out_format)
            .await
    }

    fn is_shared_block_storage(&self) -> bool {
        true
    }

    async fn direct_fetch(
        &self,
        image_id: &str,
        image_meta: &ImageMeta,
        image_locations: &[ImageLocation],
    ) -> Result<()> {
        if self.check_image_exists().await? {
            debug!("{} already exists, skipping direct fetch", self.rbd_name);
            return Ok(());
        }

        let format = image_meta.disk_format.as_deref().unwrap_or_default();
        if !matches!(format, "raw" | "iso") {
            return Err(VmImageError::UnsupportedFormat {
                image_id: image_id.to_string(),
                format: format.to_string(),
            });
        }

        if !self.driver.supports_layering().await? {
            return Err(VmImageError::unsupported(
                image_id,
                "installed storage driver does not support cloning",
            ));
        }

        for location in image_locations {
            if self.driver.is_cloneable(location, image_meta).await {
                info!("Cloning {} from {}", self.rbd_name, location.url);
                return self.driver.clone_image(location, &self.rbd_name).await;
            }
            debug!("Location {} is not cloneable", location.url);
        }

        Err(VmImageError::NoAccessibleSource {
            image_id: image_id.to_string(),
        })
    }

    async fn disk_config(&self, attachment: &DiskAttachment) -> Result<DiskConfig> {
        let rbd = &self.context.config.rbd;
        let (hosts, ports) = self.driver.get_mon_addrs().await?;

        let mut info = DiskConfig {
            source_type: Some(SourceType::Network),
            source_device: attachment.device_type.clone(),
            source_protocol: Some("rbd".to_string()),
            source_name: Some(format!("{}/{}", self.pool, self.rbd_name)),
            source_hosts: hosts,
            source_ports: ports,
            driver_format: Some(DriverFormat::Raw),
            driver_cache: attachment.cache_mode.clone(),
            target_bus: attachment.disk_bus.clone(),
            target_dev: attachment.disk_dev.clone(),
            ..Default::default()
        };

        // A configured secret forces authentication on; otherwise it follows
        // the presence of a user name.
        let auth_enabled = rbd.secret_uuid.is_some() || rbd.user.is_some();
        if auth_enabled {
            info.auth_username = rbd.user.clone();
            info.auth_secret_type = Some("ceph".to_string());
            info.auth_secret_uuid = rbd.secret_uuid.clone();
        }

        Ok(info)
    }
}
