use async_trait::async_trait;
use vmimage_core::{ImageLocation, ImageMeta, PoolInfo, Result, VmImageError};

/// Client for the remote block store backing the `rbd` image type.
///
/// Calls block until the remote side answers; any retry policy belongs to
/// the implementation, callers add none.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;
    async fn size(&self, name: &str) -> Result<u64>;
    async fn resize(&self, name: &str, size: u64) -> Result<()>;
    async fn supports_layering(&self) -> Result<bool>;
    /// Whether `location` can be cloned into the driver's pool. Failures
    /// while inspecting the location count as "not cloneable".
    async fn is_cloneable(&self, location: &ImageLocation, meta: &ImageMeta) -> bool;
    async fn clone_image(&self, location: &ImageLocation, name: &str) -> Result<()>;
    /// Monitor hosts and ports, index aligned.
    async fn get_mon_addrs(&self) -> Result<(Vec<String>, Vec<String>)>;
    /// Connection arguments for the command line import tool.
    fn ceph_args(&self) -> Vec<String>;
    async fn get_pool_info(&self) -> Result<PoolInfo>;
}

/// Components of an `rbd://fsid/pool/image/snapshot` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbdLocation {
    pub fsid: String,
    pub pool: String,
    pub image: String,
    pub snapshot: String,
}

impl RbdLocation {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || VmImageError::InvalidLocator {
            path: url.to_string(),
        };

        let rest = url.strip_prefix("rbd://").ok_or_else(invalid)?;
        let pieces: Vec<&str> = rest.split('/').collect();
        if pieces.len() != 4 || pieces.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        Ok(Self {
            fsid: pieces[0].to_string(),
            pool: pieces[1].to_string(),
            image: pieces[2].to_string(),
            snapshot: pieces[3].to_string(),
        })
    }

    /// `pool/image@snapshot`, as accepted by the rbd tool.
    pub fn snapshot_spec(&self) -> String {
        format!("{}/{}@{}", self.pool, self.image, self.snapshot)
    }
}
