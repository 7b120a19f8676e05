mod backends;
mod cache;
mod describe;
mod driver_format;
mod exists;
mod pool_info;
mod snapshot;

use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use vmimage_core::{ImageBackendConfig, Result};
use vmimage_storage::{BackendRegistry, CommandDiskUtils, ImageContext, RbdCommandDriver};

use crate::output::OutputFormat;

/// Names one instance disk.
#[derive(Args, Debug, Clone)]
pub struct DiskArgs {
    /// Instance the disk belongs to
    pub instance: String,

    /// Disk name, e.g. disk or disk.local
    pub disk: String,

    /// Backend type (raw, qcow2, lvm, rbd, default); falls back to images_type
    #[arg(short = 't', long = "type")]
    pub image_type: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check whether a disk exists on its backend
    Exists {
        #[command(flatten)]
        disk: DiskArgs,
    },

    /// Create a disk from a base image, fetching the base at most once
    Cache {
        #[command(flatten)]
        disk: DiskArgs,

        /// Local path or http(s) URL of the base image
        #[arg(long)]
        source: String,

        /// File name in the base image cache (default: last segment of the source)
        #[arg(long)]
        filename: Option<String>,

        /// Disk size (e.g., 20G)
        #[arg(long)]
        size: Option<String>,
    },

    /// Print the disk description handed to the hypervisor
    Describe {
        #[command(flatten)]
        disk: DiskArgs,

        /// Target bus
        #[arg(long, default_value = "virtio")]
        bus: String,

        /// Target device
        #[arg(long, default_value = "vda")]
        dev: String,

        /// Cache mode
        #[arg(long, default_value = "none")]
        cache_mode: String,

        /// Extra specs (format: key=value), e.g. quota:disk_read_iops_sec=500
        #[arg(short, long)]
        spec: Vec<String>,
    },

    /// Resolve and pin the driver format of a disk
    Format {
        #[command(flatten)]
        disk: DiskArgs,
    },

    /// Copy a disk out to a file in the given format
    Snapshot {
        /// Existing disk locator (file path, /dev/vg/lv or rbd:pool/name)
        path: String,

        /// Destination file
        target: PathBuf,

        /// Backend type of the disk
        #[arg(short = 't', long = "type")]
        image_type: Option<String>,

        /// Output format
        #[arg(long, default_value = "qcow2")]
        out_format: String,
    },

    /// Show rbd pool usage
    PoolInfo,

    /// List registered backends
    Backends,
}

/// Registry wired to the command line tools of this host.
async fn build_registry(config: ImageBackendConfig) -> BackendRegistry {
    let driver = Arc::new(RbdCommandDriver::new(&config.rbd));
    let context = ImageContext::new(config, Arc::new(CommandDiskUtils::new()))
        .with_storage_driver(driver)
        .detect_fallocate()
        .await;
    BackendRegistry::new(context)
}

pub async fn execute(
    command: Command,
    config: ImageBackendConfig,
    format: OutputFormat,
) -> Result<()> {
    let registry = build_registry(config).await;

    match command {
        Command::Exists { disk } => exists::execute(&registry, disk, format).await,
        Command::Cache {
            disk,
            source,
            filename,
            size,
        } => cache::execute(&registry, disk, source, filename, size).await,
        Command::Describe {
            disk,
            bus,
            dev,
            cache_mode,
            spec,
        } => describe::execute(&registry, disk, bus, dev, cache_mode, spec, format).await,
        Command::Format { disk } => driver_format::execute(&registry, disk, format).await,
        Command::Snapshot {
            path,
            target,
            image_type,
            out_format,
        } => snapshot::execute(&registry, path, target, image_type, out_format).await,
        Command::PoolInfo => pool_info::execute(&registry, format).await,
        Command::Backends => backends::execute(&registry, format).await,
    }
}
