use serde::Serialize;
use tabled::Tabled;
use vmimage_core::Result;
use vmimage_storage::BackendRegistry;

use super::DiskArgs;
use crate::output::OutputFormat;

#[derive(Serialize, Tabled)]
struct DiskPresence {
    path: String,
    exists: bool,
}

pub async fn execute(registry: &BackendRegistry, disk: DiskArgs, format: OutputFormat) -> Result<()> {
    let image = registry.image(&disk.instance, &disk.disk, disk.image_type.as_deref())?;
    let presence = DiskPresence {
        path: image.path().to_string(),
        exists: image.check_image_exists().await?,
    };

    println!("{}", format.render_rows(vec![presence]));
    Ok(())
}
