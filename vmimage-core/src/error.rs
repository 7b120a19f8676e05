use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmImageError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid image locator: {path}")]
    InvalidLocator { path: String },

    #[error("Image {image_id} is unacceptable: unsupported disk format {format:?}")]
    UnsupportedFormat { image_id: String, format: String },

    #[error("Image {image_id} is unacceptable: {reason}")]
    UnsupportedCapability { image_id: String, reason: String },

    #[error("Image {image_id} is unacceptable: no image locations are accessible")]
    NoAccessibleSource { image_id: String },

    #[error("{base:?} virtual size {base_size} larger than requested disk size {size}")]
    SizeConflict {
        base: PathBuf,
        base_size: u64,
        size: u64,
    },

    #[error("Disk info file {store:?} already holds a format for {path}")]
    MetadataConflict { store: PathBuf, path: String },

    #[error("Could not load disk info line {line:?}: {reason}")]
    MetadataParseFailure { line: String, reason: String },

    #[error("Disk info file read/write failure: {0}")]
    MetadataIOFailure(String),

    #[error("Storage driver error during {operation}: {cause}")]
    Driver { operation: String, cause: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl VmImageError {
    pub fn driver(operation: &str, cause: impl std::fmt::Display) -> Self {
        VmImageError::Driver {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn unsupported(image_id: &str, reason: &str) -> Self {
        VmImageError::UnsupportedCapability {
            image_id: image_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VmImageError>;
