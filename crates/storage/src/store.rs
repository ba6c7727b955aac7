//! Object store seam.
//!
//! The gateway only ever needs three calls from the storage service. Keeping
//! them behind a trait lets the orchestrator run against an in-memory store
//! in tests and against S3 in production.

use async_trait::async_trait;

use crate::error::StoreError;

/// Minimal object storage interface used by the gateway.
///
/// The trait is object-safe (via `async_trait`) so the gateway can hold an
/// `Arc<dyn ObjectStore>` chosen at startup.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix`, in the store's listing order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Full contents of one object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write one object in a single request, replacing any previous version.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;
}
