use std::time::Duration;

use data_loader::DataLoadError;
use thiserror::Error;

/// Low-level failure reported by an [`ObjectStore`](crate::ObjectStore) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object s3://{bucket}/{key} does not exist")]
    NoSuchKey { bucket: String, key: String },

    #[error("{0}")]
    Service(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the storage gateway.
///
/// All of them abort the run: without inputs there is nothing to process,
/// and a failed write leaves the result nowhere.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Connectivity or permission problem while reading
    #[error("Storage unavailable during {operation} on s3://{bucket}/{path}: {message}")]
    Unavailable {
        operation: &'static str,
        bucket: String,
        path: String,
        message: String,
    },

    /// The ingest prefix holds no CSV objects
    #[error("No input files found under s3://{bucket}/{prefix}")]
    NotFound { bucket: String, prefix: String },

    /// A put (backup or upload) failed
    #[error("Failed to write s3://{bucket}/{key}: {message}")]
    Write {
        bucket: String,
        key: String,
        message: String,
    },

    /// Result rows could not be serialized
    #[error("Failed to encode output: {0}")]
    Encode(#[from] DataLoadError),
}
