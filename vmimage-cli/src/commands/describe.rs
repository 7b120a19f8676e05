use std::collections::HashMap;
use vmimage_core::{DiskAttachment, Result, VmImageError};
use vmimage_storage::BackendRegistry;

use super::DiskArgs;
use crate::output::OutputFormat;

fn parse_spec(spec: &str) -> Result<(String, String)> {
    spec.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| {
            VmImageError::ConfigError(format!("Extra spec must be in format key=value: {spec}"))
        })
}

pub async fn execute(
    registry: &BackendRegistry,
    disk: DiskArgs,
    bus: String,
    dev: String,
    cache_mode: String,
    specs: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let extra_specs = specs
        .iter()
        .map(|spec| parse_spec(spec))
        .collect::<Result<HashMap<_, _>>>()?;

    let attachment = DiskAttachment {
        disk_bus: bus,
        disk_dev: dev,
        device_type: "disk".to_string(),
        cache_mode,
        extra_specs,
    };

    let image = registry.image(&disk.instance, &disk.disk, disk.image_type.as_deref())?;
    let info = image.disk_config(&attachment).await?;

    println!("{}", format.render_record(&info));
    Ok(())
}
