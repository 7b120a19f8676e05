use async_trait::async_trait;
use std::path::Path;
use tracing::info;
use vmimage_core::{DriverFormat, ImageDescriptor, Result, SourceType, VmImageError};

use crate::fetch::FetchTemplate;
use crate::image::{Image, ImageContext, ImageTarget};

/// Logical volume in the configured volume group.
pub struct LvmImage {
    descriptor: ImageDescriptor,
    context: ImageContext,
    vg: String,
    lv: String,
}

/// Splits `/dev/<vg>/<lv>`.
fn parse_volume_path(path: &str) -> Result<(String, String)> {
    let invalid = || VmImageError::InvalidLocator {
        path: path.to_string(),
    };

    let rest = path.strip_prefix("/dev/").ok_or_else(invalid)?;
    let (vg, lv) = rest.split_once('/').ok_or_else(invalid)?;
    if vg.is_empty() || lv.is_empty() || lv.contains('/') {
        return Err(invalid());
    }

    Ok((vg.to_string(), lv.to_string()))
}

impl LvmImage {
    pub fn new(context: ImageContext, target: ImageTarget) -> Result<Self> {
        let (vg, lv) = match &target {
            ImageTarget::Path(path) => parse_volume_path(path)?,
            ImageTarget::Disk {
                instance,
                disk_name,
            } => {
                let vg = context
                    .config
                    .volume_group
                    .clone()
                    .filter(|vg| !vg.is_empty())
                    .ok_or_else(|| {
                        VmImageError::ConfigError(
                            "You should specify volume_group to use LVM images".to_string(),
                        )
                    })?;
                (vg, format!("{instance}_{disk_name}"))
            }
        };

        let descriptor = ImageDescriptor::new(
            SourceType::Block,
            DriverFormat::Raw,
            format!("/dev/{vg}/{lv}"),
            context.config.lock_path(),
        )
        .with_block_device(true);

        Ok(Self {
            descriptor,
            context,
            vg,
            lv,
        })
    }

    pub fn volume_group(&self) -> &str {
        &self.vg
    }

    pub fn logical_volume(&self) -> &str {
        &self.lv
    }
}

#[async_trait]
impl Image for LvmImage {
    fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn context(&self) -> &ImageContext {
        &self.context
    }

    async fn create_image(
        &self,
        prepare_template: &dyn FetchTemplate,
        base: &Path,
        size: Option<u64>,
    ) -> Result<()> {
        prepare_template.fetch(base, size).await?;
        let base_size = self.get_disk_size(base).await?;
        self.verify_base_size(base, size, base_size).await?;

        if self.check_image_exists().await? {
            return Ok(());
        }

        let volume_size = size.filter(|s| *s > base_size).unwrap_or(base_size);
        info!(
            "Creating logical volume {}/{} of {} bytes",
            self.vg, self.lv, volume_size
        );
        self.context
            .utils
            .create_lvm_volume(
                &self.vg,
                &self.lv,
                volume_size,
                self.context.config.sparse_logical_volumes,
            )
            .await?;

        self.context
            .utils
            .convert_image(
                &base.to_string_lossy(),
                Path::new(self.path()),
                &DriverFormat::Raw,
            )
            .await
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
}
