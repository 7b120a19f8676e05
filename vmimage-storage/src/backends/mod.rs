pub mod lvm;
pub mod qcow2;
pub mod raw;
pub mod rbd;

use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;
use vmimage_core::{ImageBackendConfig, Result};

use crate::image::ImageTarget;

pub use lvm::LvmImage;
pub use qcow2::Qcow2Image;
pub use raw::RawImage;
pub use rbd::RbdImage;

/// Location of a file backed disk.
pub(crate) fn local_disk_path(config: &ImageBackendConfig, target: &ImageTarget) -> PathBuf {
    match target {
        ImageTarget::Disk {
            instance,
            disk_name,
        } => config.instance_dir(instance).join(disk_name),
        ImageTarget::Path(path) => PathBuf::from(path),
    }
}

/// Hidden sibling a disk is built in before being renamed into place.
pub(crate) fn temp_sibling(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{file_name}.{}.part", Uuid::new_v4()))
}

/// Moves a finished temporary disk into place, or removes it when building
/// it failed.
pub(crate) async fn publish(tmp: &Path, target: &Path, built: Result<()>) -> Result<()> {
    match built {
        Ok(()) => {
            fs::rename(tmp, target).await?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(tmp).await;
            Err(e)
        }
    }
}
