//! In-process object store.
//!
//! Objects live in a `BTreeMap`, so listings come back in lexicographic key
//! order the way S3 returns them. Failures can be injected per operation,
//! and every call is recorded so callers can assert on ordering.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::ObjectStore;

/// One recorded call against a [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    List { bucket: String, prefix: String },
    Get { bucket: String, key: String },
    Put { bucket: String, key: String },
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), Vec<u8>>,
    operations: Vec<StoreOp>,
    fail_list: Option<String>,
    fail_put_buckets: Vec<(String, String)>,
}

/// [`ObjectStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.lock()
            .objects
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Contents of an object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Every key stored in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Make every `list` call fail with `message`.
    pub fn fail_list(&self, message: impl Into<String>) {
        self.lock().fail_list = Some(message.into());
    }

    /// Make every `put` into `bucket` fail with `message`.
    pub fn fail_puts_to(&self, bucket: &str, message: impl Into<String>) {
        self.lock()
            .fail_put_buckets
            .push((bucket.to_string(), message.into()));
    }

    /// Calls made so far, in order.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.lock().operations.clone()
    }

    /// Number of `put` calls made so far.
    pub fn put_count(&self) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| matches!(op, StoreOp::Put { .. }))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-call;
        // the map itself is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.lock();
        state.operations.push(StoreOp::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        if let Some(message) = &state.fail_list {
            return Err(StoreError::Service(message.clone()));
        }
        Ok(state
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut state = self.lock();
        state.operations.push(StoreOp::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.operations.push(StoreOp::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if let Some((_, message)) = state.fail_put_buckets.iter().find(|(b, _)| b == bucket) {
            return Err(StoreError::Service(message.clone()));
        }
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}
