use serde::Serialize;
use tabled::Tabled;
use vmimage_core::Result;
use vmimage_storage::BackendRegistry;

use super::DiskArgs;
use crate::output::OutputFormat;

#[derive(Serialize, Tabled)]
struct DiskFormat {
    path: String,
    format: String,
}

pub async fn execute(registry: &BackendRegistry, disk: DiskArgs, format: OutputFormat) -> Result<()> {
    let image = registry.image(&disk.instance, &disk.disk, disk.image_type.as_deref())?;
    let resolved = image.resolve_driver_format().await?;

    let row = DiskFormat {
        path: image.path().to_string(),
        format: resolved.to_string(),
    };
    println!("{}", format.render_rows(vec![row]));
    Ok(())
}
