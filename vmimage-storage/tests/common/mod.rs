#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vmimage_core::{
    DriverFormat, ImageBackendConfig, ImageLocation, ImageMeta, PoolInfo, Result, VmImageError,
};
use vmimage_storage::{DiskUtils, FetchTemplate, ImageContext, StorageDriver};

/// In-memory stand-in for the remote block store.
#[derive(Default)]
pub struct FakeStorageDriver {
    pub objects: Mutex<HashMap<String, u64>>,
    pub layering: bool,
    pub cloneable: HashSet<String>,
    pub fail_exists: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeStorageDriver {
    pub fn with_layering() -> Self {
        Self {
            layering: true,
            ..Default::default()
        }
    }

    pub fn insert(&self, name: &str, size: u64) {
        self.objects.lock().unwrap().insert(name.to_string(), size);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StorageDriver for FakeStorageDriver {
    async fn exists(&self, name: &str) -> Result<bool> {
        self.record(format!("exists:{name}"));
        if self.fail_exists {
            return Err(VmImageError::driver("exists", "cluster unreachable"));
        }
        Ok(self.objects.lock().unwrap().contains_key(name))
    }

    async fn size(&self, name: &str) -> Result<u64> {
        self.record(format!("size:{name}"));
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| VmImageError::driver("size", format!("{name} not found")))
    }

    async fn resize(&self, name: &str, size: u64) -> Result<()> {
        self.record(format!("resize:{name}:{size}"));
        self.insert(name, size);
        Ok(())
    }

    async fn supports_layering(&self) -> Result<bool> {
        Ok(self.layering)
    }

    async fn is_cloneable(&self, location: &ImageLocation, _meta: &ImageMeta) -> bool {
        self.record(format!("is_cloneable:{}", location.url));
        self.cloneable.contains(&location.url)
    }

    async fn clone_image(&self, location: &ImageLocation, name: &str) -> Result<()> {
        self.record(format!("clone:{}:{name}", location.url));
        self.insert(name, 1024);
        Ok(())
    }

    async fn get_mon_addrs(&self) -> Result<(Vec<String>, Vec<String>)> {
        Ok((
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            vec!["6789".to_string(), "6789".to_string()],
        ))
    }

    fn ceph_args(&self) -> Vec<String> {
        vec!["--id".to_string(), "compute01".to_string()]
    }

    async fn get_pool_info(&self) -> Result<PoolInfo> {
        Ok(PoolInfo {
            pool: "vms".to_string(),
            total_bytes: 100,
            used_bytes: 40,
            free_bytes: 60,
        })
    }
}

/// Disk utilities working on plain files; sizes are file lengths.
#[derive(Default)]
pub struct FakeDiskUtils {
    pub calls: Mutex<Vec<String>>,
    pub can_fallocate: bool,
    /// Objects imported with `rbd import` land here.
    pub driver: Option<Arc<FakeStorageDriver>>,
}

impl FakeDiskUtils {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DiskUtils for FakeDiskUtils {
    async fn disk_size(&self, path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn detect_format(&self, _path: &Path) -> Result<DriverFormat> {
        Ok(DriverFormat::Raw)
    }

    async fn convert_image(
        &self,
        source: &str,
        target: &Path,
        out_format: &DriverFormat,
    ) -> Result<()> {
        self.record(format!("convert:{source}:{}:{out_format}", target.display()));
        Ok(())
    }

    async fn create_cow_image(
        &self,
        backing: &Path,
        target: &Path,
        size: Option<u64>,
    ) -> Result<()> {
        self.record(format!("cow:{}:{:?}", backing.display(), size));
        tokio::fs::write(target, b"QFI\xfb").await?;
        Ok(())
    }

    async fn extend(&self, path: &Path, size: u64) -> Result<()> {
        self.record(format!("extend:{size}"));
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(size).await?;
        Ok(())
    }

    async fn create_lvm_volume(&self, vg: &str, lv: &str, size: u64, sparse: bool) -> Result<()> {
        self.record(format!("lvcreate:{vg}:{lv}:{size}:{sparse}"));
        Ok(())
    }

    async fn import_image(&self, args: &[String]) -> Result<()> {
        self.record(format!("import:{}", args.join(" ")));
        if let Some(driver) = &self.driver {
            let size = tokio::fs::metadata(&args[2]).await?.len();
            driver.insert(&args[3], size);
        }
        Ok(())
    }

    async fn fallocate(&self, path: &Path, size: u64) -> Result<()> {
        self.record(format!("fallocate:{}:{size}", path.display()));
        Ok(())
    }

    async fn can_fallocate(&self, _dir: &Path) -> bool {
        self.can_fallocate
    }
}

/// Fetch that writes `payload` atomically and counts its runs.
#[derive(Clone)]
pub struct CountingFetch {
    pub runs: Arc<AtomicUsize>,
    pub payload: Vec<u8>,
    pub delay: Duration,
}

impl CountingFetch {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            runs: Arc::new(AtomicUsize::new(0)),
            payload: payload.to_vec(),
            delay: Duration::from_millis(0),
        }
    }

    pub fn slow(payload: &[u8]) -> Self {
        Self {
            delay: Duration::from_millis(100),
            ..Self::new(payload)
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchTemplate for CountingFetch {
    async fn fetch(&self, target: &Path, _max_size: Option<u64>) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let tmp = target.with_extension("fetching");
        tokio::fs::write(&tmp, &self.payload).await?;
        tokio::fs::rename(&tmp, target).await?;
        Ok(())
    }
}

pub fn test_config(root: &Path) -> ImageBackendConfig {
    ImageBackendConfig {
        instances_path: root.join("instances"),
        ..Default::default()
    }
}

pub fn base_path(config: &ImageBackendConfig, filename: &str) -> PathBuf {
    config.base_dir().join(filename)
}

pub fn context_with(
    config: ImageBackendConfig,
    utils: Arc<FakeDiskUtils>,
    driver: Option<Arc<FakeStorageDriver>>,
) -> ImageContext {
    let context = ImageContext::new(config, utils);
    match driver {
        Some(driver) => context.with_storage_driver(driver),
        None => context,
    }
}
