use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tracing::info;
use vmimage_core::{
    DriverFormat, ImageDescriptor, PreallocateMode, Result, SourceType, VmImageError,
};

use super::{local_disk_path, publish, temp_sibling};
use crate::fetch::FetchTemplate;
use crate::image::{Image, ImageContext, ImageTarget, disk_info_path_for};

/// Plain file holding a full copy of the base image.
pub struct RawImage {
    descriptor: ImageDescriptor,
    context: ImageContext,
}

impl RawImage {
    pub fn new(context: ImageContext, target: ImageTarget) -> Result<Self> {
        let path = local_disk_path(&context.config, &target);
        let descriptor = ImageDescriptor::new(
            SourceType::File,
            DriverFormat::Raw,
            path.to_string_lossy().into_owned(),
            context.config.lock_path(),
        )
        .with_preallocate(context.config.preallocate_images == PreallocateMode::Space)
        .with_disk_info_path(disk_info_path_for(&path));

        Ok(Self {
            descriptor,
            context,
        })
    }
}

#[async_trait]
impl Image for RawImage {
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
        self.verify_base_size(base, size, 0).await?;

        let target = Path::new(self.path());
        if fs::try_exists(target).await? {
            return Ok(());
        }
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }

        info!("Copying base {} to {}", base.display(), target.display());
        let tmp = temp_sibling(target);
        let built = async {
            fs::copy(base, &tmp).await?;
            if let Some(size) = size {
                if size > self.get_disk_size(&tmp).await? {
                    self.context.utils.extend(&tmp, size).await?;
                }
            }
            Ok::<(), VmImageError>(())
        }
        .await;

        publish(&tmp, target, built).await
    }

    /// An existing raw disk may hold anything the guest wrote, so its format
    /// is probed rather than assumed.
    async fn get_driver_format(&self) -> Result<DriverFormat> {
        let path = Path::new(self.path());
        if fs::try_exists(path).await? {
            self.context.utils.detect_format(path).await
        } else {
            Ok(DriverFormat::Raw)
        }
    }

    async fn snapshot_extract(&self, target: &Path, out_format: &DriverFormat) -> Result<()> {
        self.context
            .utils
            .convert_image(self.path(), target, out_format)
            .await
    }
}
