//! Named locks serializing base image creation.
//!
//! A lock is first taken inside the process (an async mutex per name) and
//! then, when a lock directory is given, as an exclusive `flock` on a file in
//! that directory. The directory lives next to the instance files, so every
//! host sharing them takes part.

use nix::fcntl::{Flock, FlockArg};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use vmimage_core::{Result, VmImageError};

const LOCK_FILE_PREFIX: &str = "vmimage-";

#[derive(Clone, Default)]
pub struct CacheCoordinator {
    semaphores: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

/// Held lock. Dropping it releases the file lock, then the in-process one.
pub struct LockGuard {
    name: String,
    _file: Option<Flock<File>>,
    _inner: OwnedMutexGuard<()>,
}

impl CacheCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut semaphores = self
            .semaphores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = semaphores.get(name).and_then(Weak::upgrade) {
            return existing;
        }

        semaphores.retain(|_, weak| weak.strong_count() > 0);
        let semaphore = Arc::new(AsyncMutex::new(()));
        semaphores.insert(name.to_string(), Arc::downgrade(&semaphore));
        semaphore
    }

    /// Lock `name` among tasks of this process only.
    pub async fn lock_internal(&self, name: &str) -> LockGuard {
        let inner = self.semaphore(name).lock_owned().await;
        debug!("Acquired in-process lock {}", name);
        LockGuard {
            name: name.to_string(),
            _file: None,
            _inner: inner,
        }
    }

    /// Lock `name` across every process sharing `lock_path`. Waits for as
    /// long as another holder keeps it.
    pub async fn lock_external(&self, name: &str, lock_path: &Path) -> Result<LockGuard> {
        let inner = self.semaphore(name).lock_owned().await;

        let lock_file = lock_file_path(lock_path, name);
        let file = tokio::task::spawn_blocking(move || acquire_flock(&lock_file))
            .await
            .map_err(|e| VmImageError::Other(e.into()))??;

        debug!("Acquired external lock {} in {}", name, lock_path.display());
        Ok(LockGuard {
            name: name.to_string(),
            _file: Some(file),
            _inner: inner,
        })
    }
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!("Releasing lock {}", self.name);
    }
}

/// Flat, collision free file name for a lock. `_` is the escape character:
/// `_` becomes `__`, `/` becomes `_s` and `\` becomes `_b`.
fn lock_file_path(lock_path: &Path, name: &str) -> PathBuf {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '_' => escaped.push_str("__"),
            '/' => escaped.push_str("_s"),
            '\\' => escaped.push_str("_b"),
            c => escaped.push(c),
        }
    }
    lock_path.join(format!("{LOCK_FILE_PREFIX}{escaped}"))
}

fn acquire_flock(lock_file: &Path) -> Result<Flock<File>> {
    if let Some(dir) = lock_file.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_file)?;

    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| VmImageError::IoError(std::io::Error::from(errno)))
}
