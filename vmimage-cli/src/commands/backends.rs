use serde::Serialize;
use tabled::Tabled;
use vmimage_core::Result;
use vmimage_storage::BackendRegistry;

use crate::output::OutputFormat;

#[derive(Serialize, Tabled)]
struct Backend {
    name: String,
    configured: bool,
}

pub async fn execute(registry: &BackendRegistry, format: OutputFormat) -> Result<()> {
    let configured = &registry.context().config.images_type;
    let rows: Vec<Backend> = registry
        .backend_names()
        .into_iter()
        .map(|name| Backend {
            name: name.to_string(),
            configured: name == configured.as_str(),
        })
        .collect();

    println!("{}", format.render_rows(rows));
    Ok(())
}
