mod commands;
mod output;
mod source;
mod utils;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vmimage_core::ImageBackendConfig;

#[derive(Parser, Debug)]
#[command(name = "vmimage")]
#[command(about = "vmimage - Manage VM disk images on file, LVM and rbd backends", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    #[arg(
        long,
        global = true,
        env = "VMIMAGE_CONFIG",
        help = "Path to the configuration file (default: ~/.vmimage/config.yaml)"
    )]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Quiet output")]
    quiet: bool,

    #[arg(
        long,
        global = true,
        help = "Output format",
        value_enum,
        default_value = "table"
    )]
    format: output::OutputFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => ImageBackendConfig::load_from(path)?,
        None => ImageBackendConfig::load()?,
    };

    match commands::execute(cli.command, config, cli.format).await {
        Ok(_) => Ok(()),
        Err(e) => {
            output::report_failure(&e.to_string());
            std::process::exit(1);
        }
    }
}
