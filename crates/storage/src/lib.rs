//! # Storage Crate
//!
//! Object storage is the handoff medium of the batch: inputs are listed and
//! downloaded from an ingest prefix, copied to a backup location before any
//! processing, and the result CSV is written back as a single object.
//!
//! ## Components
//!
//! - **store**: the `ObjectStore` trait (list/get/put)
//! - **s3**: `S3ObjectStore`, the production backend
//! - **memory**: `MemoryObjectStore`, an in-process backend for tests
//! - **gateway**: `StorageGateway`, the fetch/backup/upload steps
//!
//! ## Example Usage
//!
//! ```ignore
//! let store = Arc::new(S3ObjectStore::new(&aws_config));
//! let gateway = StorageGateway::new(store);
//!
//! let files = gateway.fetch_inputs("ml-v1", "input/ingest/").await?;
//! gateway.backup(&files, "ml-backup", "backup_input/").await?;
//! ```

pub mod error;
pub mod gateway;
pub mod memory;
pub mod s3;
pub mod store;

pub use error::{StorageError, StoreError};
pub use gateway::{resolve_output_key, ObjectLocation, RawFile, StorageGateway};
pub use memory::{MemoryObjectStore, StoreOp};
pub use s3::S3ObjectStore;
pub use store::ObjectStore;
