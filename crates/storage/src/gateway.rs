//! Storage gateway: the three storage steps of a run.
//!
//! 1. `fetch_inputs` downloads every CSV under the ingest prefix
//! 2. `backup` writes an untouched copy of each download
//! 3. `upload` writes the combined result as one object

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use data_loader::{write_output_csv, OutputRecord};

use crate::error::{StorageError, StoreError};
use crate::store::ObjectStore;

/// Placeholder in output keys replaced with the run date
pub const DATE_PLACEHOLDER: &str = "{date}";

/// Per-call limit when none is configured
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(60);

/// One downloaded input object, kept byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    /// Full object key
    pub key: String,
    /// Last path segment of the key
    pub name: String,
    /// Key below the ingest prefix, used to place the backup copy
    pub relative_key: String,
    pub bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(key: impl Into<String>, bytes: Vec<u8>) -> Self {
        let key = key.into();
        let name = file_name(&key).to_string();
        Self {
            relative_key: name.clone(),
            key,
            name,
            bytes,
        }
    }

    /// A file listed under `prefix`; nested sub-prefixes are kept.
    pub fn under_prefix(prefix: &str, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        let mut file = Self::new(key, bytes);
        let relative = file
            .key
            .strip_prefix(prefix)
            .unwrap_or(&file.key)
            .trim_start_matches('/');
        if !relative.is_empty() {
            file.relative_key = relative.to_string();
        }
        file
    }
}

/// Bucket and key of a written object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Wraps an [`ObjectStore`] with the fetch/backup/upload steps of a run.
///
/// Every store call is bounded by a timeout; one that elapses is reported
/// like any other failure of that call.
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout)))
    }

    /// Download every `.csv` object under `prefix`, in listing order.
    ///
    /// Non-CSV keys (folder markers, manifests) are skipped.
    pub async fn fetch_inputs(&self, bucket: &str, prefix: &str) -> Result<Vec<RawFile>, StorageError> {
        let start = Instant::now();
        let keys = self
            .bounded(self.store.list(bucket, prefix))
            .await
            .map_err(|e| unavailable("list", bucket, prefix, e))?;

        let csv_keys: Vec<String> = keys
            .into_iter()
            .filter(|key| {
                let keep = file_name(key).ends_with(".csv");
                if !keep {
                    debug!("Skipping non-CSV object {}", key);
                }
                keep
            })
            .collect();

        if csv_keys.is_empty() {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }

        let mut files = Vec::with_capacity(csv_keys.len());
        for key in csv_keys {
            let bytes = self.bounded(self.store.get(bucket, &key)).await.map_err(|e| match e {
                StoreError::NoSuchKey { .. } => StorageError::NotFound {
                    bucket: bucket.to_string(),
                    prefix: key.clone(),
                },
                other => unavailable("get", bucket, &key, other),
            })?;
            debug!("Downloaded s3://{}/{} ({} bytes)", bucket, key, bytes.len());
            files.push(RawFile::under_prefix(prefix, key, bytes));
        }

        info!(
            "Fetched {} input files from s3://{}/{} in {:.2?}",
            files.len(),
            bucket,
            prefix,
            start.elapsed()
        );
        Ok(files)
    }

    /// Write an unmodified copy of each file to `backup_prefix` plus its key
    /// below the ingest prefix.
    ///
    /// Stops at the first failed write; copies already written stay in place.
    pub async fn backup(
        &self,
        files: &[RawFile],
        backup_bucket: &str,
        backup_prefix: &str,
    ) -> Result<Vec<ObjectLocation>, StorageError> {
        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let key = format!("{}{}", backup_prefix, file.relative_key);
            self.bounded(self.store.put(backup_bucket, &key, file.bytes.clone()))
                .await
                .map_err(|e| {
                    warn!("Backup of {} failed: {}", file.key, e);
                    StorageError::Write {
                        bucket: backup_bucket.to_string(),
                        key: key.clone(),
                        message: e.to_string(),
                    }
                })?;
            written.push(ObjectLocation {
                bucket: backup_bucket.to_string(),
                key,
            });
        }
        info!("Backed up {} input files to s3://{}/{}", written.len(), backup_bucket, backup_prefix);
        Ok(written)
    }

    /// Serialize `records` to CSV and write them with a single put.
    pub async fn upload(
        &self,
        records: &[OutputRecord],
        bucket: &str,
        key: &str,
    ) -> Result<ObjectLocation, StorageError> {
        let body = write_output_csv(records)?;
        let size = body.len();
        self.bounded(self.store.put(bucket, key, body)).await.map_err(|e| StorageError::Write {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let location = ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        info!("Uploaded {} rows ({} bytes) to {}", records.len(), size, location);
        Ok(location)
    }
}

/// Replace `{date}` in an output key template with `date` as `dd-mm-YYYY`.
pub fn resolve_output_key(template: &str, date: NaiveDate) -> String {
    template.replace(DATE_PLACEHOLDER, &date.format("%d-%m-%Y").to_string())
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn unavailable(operation: &'static str, bucket: &str, path: &str, error: StoreError) -> StorageError {
    StorageError::Unavailable {
        operation,
        bucket: bucket.to_string(),
        path: path.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_file_name_is_last_segment() {
        let file = RawFile::new("input/ingest/items.csv", b"x".to_vec());
        assert_eq!(file.name, "items.csv");
        assert_eq!(RawFile::new("items.csv", vec![]).name, "items.csv");
    }

    #[test]
    fn test_relative_key_keeps_sub_prefixes() {
        let nested = RawFile::under_prefix("input/ingest/", "input/ingest/us/items.csv", vec![]);
        assert_eq!(nested.name, "items.csv");
        assert_eq!(nested.relative_key, "us/items.csv");

        let flat = RawFile::under_prefix("input/ingest", "input/ingest/items.csv", vec![]);
        assert_eq!(flat.relative_key, "items.csv");

        let root = RawFile::under_prefix("", "items.csv", vec![]);
        assert_eq!(root.relative_key, "items.csv");
    }

    #[test]
    fn test_resolve_output_key() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            resolve_output_key("output/output-{date}.csv", date),
            "output/output-07-03-2024.csv"
        );
        assert_eq!(resolve_output_key("output/fixed.csv", date), "output/fixed.csv");
    }

    #[test]
    fn test_location_display() {
        let location = ObjectLocation {
            bucket: "ml-v1".into(),
            key: "output/a.csv".into(),
        };
        assert_eq!(location.to_string(), "s3://ml-v1/output/a.csv");
    }
}
