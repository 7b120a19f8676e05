use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use vmimage_core::Result;

use crate::lock::CacheCoordinator;

/// Produces a base image at `target`.
///
/// Implementations must make `target` appear atomically (write elsewhere,
/// then rename), since other callers treat its existence as "fetched".
/// Backends able to place the image straight into their own storage may do
/// so and leave `target` absent.
#[async_trait]
pub trait FetchTemplate: Send + Sync {
    async fn fetch(&self, target: &Path, max_size: Option<u64>) -> Result<()>;
}

#[async_trait]
impl<F, Fut> FetchTemplate for F
where
    F: Fn(PathBuf, Option<u64>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn fetch(&self, target: &Path, max_size: Option<u64>) -> Result<()> {
        (self)(target.to_path_buf(), max_size).await
    }
}

/// Wraps a fetch so that one caller at a time runs it for a given name.
///
/// The target is checked before taking the lock and again once it is held;
/// a caller that waited behind a finished fetch returns without refetching.
pub struct SynchronizedFetch<'a> {
    inner: &'a dyn FetchTemplate,
    coordinator: &'a CacheCoordinator,
    name: String,
    lock_path: PathBuf,
}

impl<'a> SynchronizedFetch<'a> {
    pub fn new(
        inner: &'a dyn FetchTemplate,
        coordinator: &'a CacheCoordinator,
        name: &str,
        lock_path: &Path,
    ) -> Self {
        Self {
            inner,
            coordinator,
            name: name.to_string(),
            lock_path: lock_path.to_path_buf(),
        }
    }
}

#[async_trait]
impl<'a> FetchTemplate for SynchronizedFetch<'a> {
    async fn fetch(&self, target: &Path, max_size: Option<u64>) -> Result<()> {
        if fs::try_exists(target).await? {
            debug!("Base image {} already present", target.display());
            return Ok(());
        }

        let _guard = self
            .coordinator
            .lock_external(&self.name, &self.lock_path)
            .await?;

        if fs::try_exists(target).await? {
            debug!(
                "Base image {} fetched while waiting for lock",
                target.display()
            );
            return Ok(());
        }

        self.inner.fetch(target, max_size).await
    }
}
