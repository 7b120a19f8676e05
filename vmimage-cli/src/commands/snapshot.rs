use std::path::PathBuf;
use vmimage_core::{DriverFormat, Result};
use vmimage_storage::BackendRegistry;

use crate::output::{disk_done, disk_step};

pub async fn execute(
    registry: &BackendRegistry,
    path: String,
    target: PathBuf,
    image_type: Option<String>,
    out_format: String,
) -> Result<()> {
    let image = registry.snapshot(&path, image_type.as_deref())?;
    let out_format = DriverFormat::from(out_format);

    disk_step(
        &format!("Extracting {} as {out_format} from", target.display()),
        image.path(),
    );
    image.snapshot_extract(&target, &out_format).await?;

    disk_done(image.path(), &format!("written to {}", target.display()));
    Ok(())
}
