use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;
use vmimage_core::{Result, VmImageError};
use vmimage_storage::{DiskUtils, FetchTemplate};

/// Where a base image is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Local(PathBuf),
    Url(String),
}

impl ImageSource {
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ImageSource::Url(source.to_string())
        } else {
            ImageSource::Local(PathBuf::from(source))
        }
    }
}

/// Fetches an [`ImageSource`] into the base image cache, refusing images
/// whose virtual size exceeds the requested disk size.
pub struct SourceFetcher {
    source: ImageSource,
    utils: Arc<dyn DiskUtils>,
    client: reqwest::Client,
}

/// Hidden per-call download file next to `target`.
fn download_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{file_name}.{}.download", Uuid::new_v4()))
}

impl SourceFetcher {
    pub fn new(source: ImageSource, utils: Arc<dyn DiskUtils>) -> Self {
        Self {
            source,
            utils,
            client: reqwest::Client::new(),
        }
    }

    async fn download(&self, url: &str, path: &Path) -> Result<()> {
        let download_error = |cause: String| VmImageError::driver("image download", cause);

        info!("Downloading image from {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_error(format!("HTTP {}", response.status())));
        }

        let mut file = fs::File::create(path).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_error(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(())
    }

    async fn fetch_into(&self, tmp: &Path, target: &Path, max_size: Option<u64>) -> Result<()> {
        match &self.source {
            ImageSource::Url(url) => self.download(url, tmp).await?,
            ImageSource::Local(path) => {
                info!("Copying image from {}", path.display());
                fs::copy(path, tmp).await?;
            }
        }

        if let Some(max_size) = max_size.filter(|size| *size > 0) {
            let virtual_size = self.utils.disk_size(tmp).await?;
            if virtual_size > max_size {
                error!(
                    "Image {} virtual size {} larger than requested disk size {}",
                    target.display(),
                    virtual_size,
                    max_size
                );
                return Err(VmImageError::SizeConflict {
                    base: target.to_path_buf(),
                    base_size: virtual_size,
                    size: max_size,
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl FetchTemplate for SourceFetcher {
    async fn fetch(&self, target: &Path, max_size: Option<u64>) -> Result<()> {
        // Other hosts treat the target's existence as "fetched", so it only
        // appears once complete.
        let tmp = download_path(target);
        match self.fetch_into(&tmp, target, max_size).await {
            Ok(()) => {
                fs::rename(&tmp, target).await?;
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmimage_core::DriverFormat;

    /// Reports file lengths as virtual sizes; nothing else is used here.
    struct FileLengthUtils;

    #[async_trait]
    impl DiskUtils for FileLengthUtils {
        async fn disk_size(&self, path: &Path) -> Result<u64> {
            Ok(fs::metadata(path).await?.len())
        }

        async fn detect_format(&self, _path: &Path) -> Result<DriverFormat> {
            Ok(DriverFormat::Raw)
        }

        async fn convert_image(&self, _: &str, _: &Path, _: &DriverFormat) -> Result<()> {
            Err(VmImageError::NotImplemented("convert_image".to_string()))
        }

        async fn create_cow_image(&self, _: &Path, _: &Path, _: Option<u64>) -> Result<()> {
            Err(VmImageError::NotImplemented("create_cow_image".to_string()))
        }

        async fn extend(&self, _: &Path, _: u64) -> Result<()> {
            Err(VmImageError::NotImplemented("extend".to_string()))
        }

        async fn create_lvm_volume(&self, _: &str, _: &str, _: u64, _: bool) -> Result<()> {
            Err(VmImageError::NotImplemented("create_lvm_volume".to_string()))
        }

        async fn import_image(&self, _: &[String]) -> Result<()> {
            Err(VmImageError::NotImplemented("import_image".to_string()))
        }

        async fn fallocate(&self, _: &Path, _: u64) -> Result<()> {
            Err(VmImageError::NotImplemented("fallocate".to_string()))
        }

        async fn can_fallocate(&self, _: &Path) -> bool {
            false
        }
    }

    fn local_fetcher(source: PathBuf) -> SourceFetcher {
        SourceFetcher::new(ImageSource::Local(source), Arc::new(FileLengthUtils))
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".download"))
            .collect()
    }

    #[test]
    fn test_parse_source() {
        assert_eq!(
            ImageSource::parse("https://example.com/a.img"),
            ImageSource::Url("https://example.com/a.img".to_string())
        );
        assert_eq!(
            ImageSource::parse("/srv/a.img"),
            ImageSource::Local(PathBuf::from("/srv/a.img"))
        );
    }

    #[tokio::test]
    async fn test_fetch_local_copy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("source.img");
        fs::write(&source, b"image").await?;
        let base_dir = dir.path().join("_base");
        fs::create_dir_all(&base_dir).await?;
        let target = base_dir.join("source.img");

        local_fetcher(source).fetch(&target, None).await?;

        assert_eq!(fs::read(&target).await?, b"image");
        assert!(leftovers(&base_dir).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_missing_local_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("base.img");

        let result = local_fetcher(dir.path().join("absent.img"))
            .fetch(&target, None)
            .await;

        assert!(result.is_err());
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_same_stem_targets_fetch_independently() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let raw_source = dir.path().join("raw-source");
        let cow_source = dir.path().join("cow-source");
        fs::write(&raw_source, vec![1u8; 256 * 1024]).await?;
        fs::write(&cow_source, vec![2u8; 128 * 1024]).await?;
        let raw_target = dir.path().join("ubuntu.img");
        let cow_target = dir.path().join("ubuntu.qcow2");

        let raw_fetcher = local_fetcher(raw_source);
        let cow_fetcher = local_fetcher(cow_source);
        let (raw, cow) = tokio::join!(
            raw_fetcher.fetch(&raw_target, None),
            cow_fetcher.fetch(&cow_target, None),
        );
        raw?;
        cow?;

        assert_eq!(fs::read(&raw_target).await?, vec![1u8; 256 * 1024]);
        assert_eq!(fs::read(&cow_target).await?, vec![2u8; 128 * 1024]);
        assert_ne!(download_path(&raw_target), download_path(&cow_target));
        assert!(leftovers(dir.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_image_larger_than_disk_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("big.img");
        fs::write(&source, vec![0u8; 4096]).await?;
        let target = dir.path().join("base.img");

        let err = local_fetcher(source.clone())
            .fetch(&target, Some(1024))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VmImageError::SizeConflict {
                base_size: 4096,
                size: 1024,
                ..
            }
        ));
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());

        local_fetcher(source.clone()).fetch(&target, Some(4096)).await?;
        assert!(target.exists());

        let other = dir.path().join("other.img");
        local_fetcher(source).fetch(&other, Some(0)).await?;
        assert!(other.exists());
        Ok(())
    }
}
