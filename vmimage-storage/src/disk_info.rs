//! Persisted record of the driver format chosen for each disk.
//!
//! The format is pinned the first time it is resolved so that a guest
//! rewriting its disk header cannot make the host reinterpret the disk in a
//! different format later. The store is a single JSON line mapping disk
//! paths to format names.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error};
use uuid::Uuid;
use vmimage_core::{DriverFormat, Result, VmImageError};

use crate::lock::CacheCoordinator;

const STORE_MODE: u32 = 0o644;

pub struct DriverFormatStore {
    path: PathBuf,
    locks: CacheCoordinator,
}

fn io_failure(path: &Path, e: impl std::fmt::Display) -> VmImageError {
    VmImageError::MetadataIOFailure(format!("{}: {e}", path.display()))
}

/// Parses one store line. Blank content is an empty record.
pub fn parse_line(line: &str) -> Result<BTreeMap<String, DriverFormat>> {
    let line = line.trim_end();
    if line.is_empty() {
        return Ok(BTreeMap::new());
    }

    serde_json::from_str(line).map_err(|e| VmImageError::MetadataParseFailure {
        line: line.to_string(),
        reason: e.to_string(),
    })
}

impl DriverFormatStore {
    pub fn new(path: PathBuf, locks: CacheCoordinator) -> Self {
        Self { path, locks }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole record without locking. A missing file is empty.
    pub async fn load(&self) -> Result<BTreeMap<String, DriverFormat>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => parse_line(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(io_failure(&self.path, e)),
        }
    }

    pub async fn lookup(&self, image_path: &str) -> Result<Option<DriverFormat>> {
        Ok(self.load().await?.remove(image_path))
    }

    /// Adds an entry for `image_path`. An existing entry is never replaced.
    pub async fn record(&self, image_path: &str, format: &DriverFormat) -> Result<()> {
        let _guard = self
            .locks
            .lock_internal(&self.path.to_string_lossy())
            .await;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| io_failure(&self.path, e))?;
        }

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(STORE_MODE)
            .open(&self.path)
            .await
            .map_err(|e| io_failure(&self.path, e))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .await
            .map_err(|e| io_failure(&self.path, e))?;
        drop(file);

        let mut entries = parse_line(&content)?;
        if entries.contains_key(image_path) {
            error!(
                "Refusing to overwrite driver format of {} in {}",
                image_path,
                self.path.display()
            );
            return Err(VmImageError::MetadataConflict {
                store: self.path.clone(),
                path: image_path.to_string(),
            });
        }
        entries.insert(image_path.to_string(), format.clone());

        let line = format!("{}\n", serde_json::to_string(&entries)?);
        self.replace_contents(line.as_bytes())
            .await
            .map_err(|e| io_failure(&self.path, e))?;

        // Keep the record owned by this process so the guest side cannot
        // rewrite it.
        nix::unistd::chown(&self.path, Some(nix::unistd::getuid()), None)
            .map_err(|e| io_failure(&self.path, e))?;

        debug!(
            "Recorded driver format {} for {} in {}",
            format,
            image_path,
            self.path.display()
        );
        Ok(())
    }

    /// Writes a sibling temporary file and renames it over the store, so
    /// unlocked readers see either the old or the new line.
    async fn replace_contents(&self, data: &[u8]) -> std::io::Result<()> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let result = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(STORE_MODE)
                .open(&tmp)
                .await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &self.path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }
}
