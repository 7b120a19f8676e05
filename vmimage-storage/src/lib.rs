pub mod backends;
pub mod disk_info;
pub mod driver;
pub mod fetch;
pub mod image;
pub mod lock;
pub mod rbd_driver;
pub mod registry;
pub mod utils;

pub use backends::{LvmImage, Qcow2Image, RawImage, RbdImage};
pub use disk_info::DriverFormatStore;
pub use driver::{RbdLocation, StorageDriver};
pub use fetch::{FetchTemplate, SynchronizedFetch};
pub use image::{Image, ImageContext, ImageTarget};
pub use lock::{CacheCoordinator, LockGuard};
pub use rbd_driver::RbdCommandDriver;
pub use registry::{BackendConstructor, BackendRegistry};
pub use utils::{CommandDiskUtils, DiskUtils};
