mod common;

use common::{FakeDiskUtils, FakeStorageDriver, context_with, test_config};
use std::collections::HashMap;
use std::sync::Arc;
use vmimage_core::{DiskAttachment, DriverFormat, Result, SourceType, VmImageError};
use vmimage_storage::{BackendRegistry, Image, ImageContext, ImageTarget, RawImage};

fn context(use_cow_images: bool) -> (tempfile::TempDir, ImageContext) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.use_cow_images = use_cow_images;
    let context = context_with(
        config,
        Arc::new(FakeDiskUtils::default()),
        Some(Arc::new(FakeStorageDriver::default())),
    );
    (dir, context)
}

#[test]
fn test_builtin_backends() {
    let (_dir, context) = context(true);
    let registry = BackendRegistry::new(context);

    assert_eq!(
        registry.backend_names(),
        vec!["default", "lvm", "qcow2", "raw", "rbd"]
    );
}

#[test]
fn test_unknown_type_names_it() {
    let (_dir, context) = context(true);
    let registry = BackendRegistry::new(context);

    match registry.image("inst-1", "disk", Some("vmdk")) {
        Err(VmImageError::ConfigError(msg)) => assert!(msg.contains("vmdk"), "{msg}"),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("vmdk should not resolve"),
    }
}

#[tokio::test]
async fn test_default_follows_cow_setting() -> Result<()> {
    for (use_cow, expected) in [(true, DriverFormat::Qcow2), (false, DriverFormat::Raw)] {
        let (_dir, context) = context(use_cow);
        let registry = BackendRegistry::new(context);

        let image = registry.image("inst-1", "disk", None)?;
        assert_eq!(image.get_driver_format().await?, expected);

        let image = registry.image("inst-1", "disk", Some("default"))?;
        assert_eq!(image.descriptor().driver_format, expected);
    }

    Ok(())
}

#[tokio::test]
async fn test_configured_type_is_used_when_unset() -> Result<()> {
    let (_dir, context) = context(true);
    let mut config = (*context.config).clone();
    config.images_type = "rbd".to_string();
    let context = ImageContext {
        config: Arc::new(config),
        ..context
    };
    let registry = BackendRegistry::new(context);

    let image = registry.image("inst-1", "disk", None)?;
    assert_eq!(image.descriptor().source_type, SourceType::Block);
    assert!(image.is_shared_block_storage());

    Ok(())
}

#[test]
fn test_snapshot_binds_existing_path() -> Result<()> {
    let (_dir, context) = context(true);
    let registry = BackendRegistry::new(context);

    let image = registry.snapshot("/srv/instances/inst-1/disk", Some("qcow2"))?;
    assert_eq!(image.path(), "/srv/instances/inst-1/disk");

    let image = registry.snapshot("rbd:vms/inst-1_disk", Some("rbd"))?;
    assert_eq!(image.path(), "rbd:rbd/inst-1_disk");

    assert!(matches!(
        registry.snapshot("inst-1_disk", Some("rbd")),
        Err(VmImageError::InvalidLocator { .. })
    ));

    Ok(())
}

#[test]
fn test_custom_backend() -> Result<()> {
    let (_dir, context) = context(true);
    let registry = BackendRegistry::empty(context).register(
        "flat",
        Arc::new(
            |context: ImageContext, target: ImageTarget| -> Result<Box<dyn Image>> {
                Ok(Box::new(RawImage::new(context, target)?))
            },
        ),
    );

    assert_eq!(registry.backend_names(), vec!["flat"]);
    assert!(registry.image("inst-1", "disk", Some("flat")).is_ok());
    assert!(registry.image("inst-1", "disk", Some("raw")).is_err());

    Ok(())
}

#[tokio::test]
async fn test_file_disk_config() -> Result<()> {
    let (_dir, context) = context(false);
    let registry = BackendRegistry::new(context);
    let image = registry.image("inst-1", "disk", Some("raw"))?;

    let attachment = DiskAttachment {
        disk_bus: "virtio".to_string(),
        disk_dev: "vda".to_string(),
        device_type: "disk".to_string(),
        cache_mode: "none".to_string(),
        extra_specs: HashMap::from([
            ("quota:disk_read_iops_sec".to_string(), "500".to_string()),
            ("quota:disk_write_bytes_sec".to_string(), "1048576".to_string()),
            ("hw:cpu_policy".to_string(), "dedicated".to_string()),
        ]),
    };
    let info = image.disk_config(&attachment).await?;

    assert_eq!(info.source_type, Some(SourceType::File));
    assert_eq!(info.source_path.as_deref(), Some(image.path()));
    assert_eq!(info.driver_name.as_deref(), Some("qemu"));
    assert_eq!(info.driver_format, Some(DriverFormat::Raw));
    assert_eq!(info.iotune.disk_read_iops_sec, Some(500));
    assert_eq!(info.iotune.disk_write_bytes_sec, Some(1048576));
    assert_eq!(info.iotune.disk_total_iops_sec, None);
    assert!(info.auth_username.is_none());

    Ok(())
}

#[tokio::test]
async fn test_file_backends_reject_direct_fetch() -> Result<()> {
    let (_dir, context) = context(true);
    let registry = BackendRegistry::new(context);
    let image = registry.image("inst-1", "disk", Some("qcow2"))?;

    let err = image
        .direct_fetch("img-1", &Default::default(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, VmImageError::UnsupportedCapability { .. }));
    assert!(!image.is_shared_block_storage());

    Ok(())
}
