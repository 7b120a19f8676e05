use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tracing::info;
use vmimage_core::{DriverFormat, ImageDescriptor, PreallocateMode, Result, SourceType};

use super::{local_disk_path, publish, temp_sibling};
use crate::fetch::FetchTemplate;
use crate::image::{Image, ImageContext, ImageTarget, disk_info_path_for, requested_size};

/// Copy-on-write overlay on top of the shared base image.
pub struct Qcow2Image {
    descriptor: ImageDescriptor,
    context: ImageContext,
}

impl Qcow2Image {
    pub fn new(context: ImageContext, target: ImageTarget) -> Result<Self> {
        let path = local_disk_path(&context.config, &target);
        let descriptor = ImageDescriptor::new(
            SourceType::File,
            DriverFormat::Qcow2,
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
impl Image for Qcow2Image {
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

        info!(
            "Creating overlay {} backed by {}",
            target.display(),
            base.display()
        );
        let tmp = temp_sibling(target);
        let built = self
            .context
            .utils
            .create_cow_image(base, &tmp, requested_size(size))
            .await;
        publish(&tmp, target, built).await
    }

    async fn snapshot_extract(&self, target: &Path, out_format: &DriverFormat) -> Result<()> {
        self.context
            .utils
            .convert_image(self.path(), target, out_format)
            .await
    }
}
