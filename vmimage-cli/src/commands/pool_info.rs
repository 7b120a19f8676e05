use colored::*;
use serde::Serialize;
use tabled::Tabled;
use vmimage_core::{PoolInfo, Result, VmImageError};
use vmimage_storage::BackendRegistry;

use crate::output::{OutputFormat, format_bytes};

#[derive(Serialize, Tabled)]
struct PoolUsage {
    pool: String,
    total: String,
    used: String,
    free: String,
}

impl From<PoolInfo> for PoolUsage {
    fn from(info: PoolInfo) -> Self {
        let free = format_bytes(info.free_bytes);
        // Flag pools with less than a tenth of their space left.
        let free = if info.free_bytes.saturating_mul(10) < info.total_bytes {
            free.red().to_string()
        } else {
            free.green().to_string()
        };

        PoolUsage {
            pool: info.pool,
            total: format_bytes(info.total_bytes),
            used: format_bytes(info.used_bytes),
            free,
        }
    }
}

pub async fn execute(registry: &BackendRegistry, format: OutputFormat) -> Result<()> {
    let driver = registry
        .context()
        .storage_driver
        .clone()
        .ok_or_else(|| VmImageError::ConfigError("No storage driver configured".to_string()))?;
    let info = driver.get_pool_info().await?;

    match format {
        OutputFormat::Table => println!("{}", format.render_rows(vec![PoolUsage::from(info)])),
        _ => println!("{}", format.render_record(&info)),
    }
    Ok(())
}
