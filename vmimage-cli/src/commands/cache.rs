use vmimage_core::Result;
use vmimage_storage::BackendRegistry;

use super::DiskArgs;
use crate::output::{disk_done, disk_step};
use crate::source::{ImageSource, SourceFetcher};
use crate::utils::{default_filename, parse_size};

pub async fn execute(
    registry: &BackendRegistry,
    disk: DiskArgs,
    source: String,
    filename: Option<String>,
    size: Option<String>,
) -> Result<()> {
    let filename = match filename {
        Some(filename) => filename,
        None => default_filename(&source)?,
    };
    let size = size.as_deref().map(parse_size).transpose()?;

    let image = registry.image(&disk.instance, &disk.disk, disk.image_type.as_deref())?;
    let fetcher = SourceFetcher::new(
        ImageSource::parse(&source),
        registry.context().utils.clone(),
    );

    disk_step(&format!("Caching base {filename} for"), image.path());
    image.cache(&fetcher, &filename, size).await?;

    disk_done(image.path(), "is ready");
    Ok(())
}
