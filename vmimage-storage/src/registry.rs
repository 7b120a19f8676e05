use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use vmimage_core::{Result, VmImageError};

use crate::backends::{LvmImage, Qcow2Image, RawImage, RbdImage};
use crate::image::{Image, ImageContext, ImageTarget};

pub type BackendConstructor =
    Arc<dyn Fn(ImageContext, ImageTarget) -> Result<Box<dyn Image>> + Send + Sync>;

fn constructor<I, F>(build: F) -> BackendConstructor
where
    I: Image + 'static,
    F: Fn(ImageContext, ImageTarget) -> Result<I> + Send + Sync + 'static,
{
    Arc::new(move |context, target| Ok(Box::new(build(context, target)?) as Box<dyn Image>))
}

/// Maps image type names to backends and hands out image objects bound to
/// one shared context.
pub struct BackendRegistry {
    context: ImageContext,
    backends: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// Registry with the built-in backends: raw, qcow2, lvm, rbd, and
    /// `default`, which is qcow2 when copy-on-write images are enabled and
    /// raw otherwise.
    pub fn new(context: ImageContext) -> Self {
        let raw = constructor(RawImage::new);
        let qcow2 = constructor(Qcow2Image::new);
        let default = if context.config.use_cow_images {
            qcow2.clone()
        } else {
            raw.clone()
        };

        Self::empty(context)
            .register("raw", raw)
            .register("qcow2", qcow2)
            .register("lvm", constructor(LvmImage::new))
            .register("rbd", constructor(RbdImage::new))
            .register("default", default)
    }

    pub fn empty(context: ImageContext) -> Self {
        Self {
            context,
            backends: HashMap::new(),
        }
    }

    pub fn register(mut self, name: &str, constructor: BackendConstructor) -> Self {
        self.backends.insert(name.to_string(), constructor);
        self
    }

    pub fn context(&self) -> &ImageContext {
        &self.context
    }

    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Constructor for `image_type`, or for the configured type when unset.
    pub fn backend(&self, image_type: Option<&str>) -> Result<&BackendConstructor> {
        let image_type = image_type.unwrap_or(&self.context.config.images_type);
        self.backends.get(image_type).ok_or_else(|| {
            VmImageError::ConfigError(format!("Unknown image_type={image_type}"))
        })
    }

    /// Image object for disk `disk_name` of `instance`.
    pub fn image(
        &self,
        instance: &str,
        disk_name: &str,
        image_type: Option<&str>,
    ) -> Result<Box<dyn Image>> {
        let backend = self.backend(image_type)?;
        debug!("Building image for {}/{}", instance, disk_name);
        backend(self.context.clone(), ImageTarget::disk(instance, disk_name))
    }

    /// Image object for an existing disk path, for extracting snapshots.
    pub fn snapshot(&self, disk_path: &str, image_type: Option<&str>) -> Result<Box<dyn Image>> {
        let backend = self.backend(image_type)?;
        backend(
            self.context.clone(),
            ImageTarget::Path(disk_path.to_string()),
        )
    }
}
