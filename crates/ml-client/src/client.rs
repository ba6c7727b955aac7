//! High-level inference client used by the orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use data_loader::{EmbeddingResult, InputRecord, NeighborResult, LIST_SEPARATOR};

use crate::credentials::CredentialCache;
use crate::error::InferenceError;
use crate::invoker::EndpointInvoker;
use crate::payload::{
    decode_embeddings, decode_neighbors, BatchPayload, EmbeddingRequest, NeighborRequest,
};

/// Client for the embedding and neighbor-lookup endpoints.
///
/// Every call runs under the cached cross-account credentials and is bounded
/// by the per-call timeout. Payloads above the batch limit are rejected
/// before anything goes over the wire.
#[derive(Clone)]
pub struct InferenceClient {
    invoker: Arc<dyn EndpointInvoker>,
    credentials: Arc<CredentialCache>,
    timeout: Duration,
    batch_limit: usize,
}

impl InferenceClient {
    pub fn new(
        invoker: Arc<dyn EndpointInvoker>,
        credentials: Arc<CredentialCache>,
        timeout: Duration,
        batch_limit: usize,
    ) -> Self {
        Self {
            invoker,
            credentials,
            timeout,
            batch_limit,
        }
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One synchronous round trip to `endpoint_name`.
    pub async fn invoke<P: BatchPayload>(
        &self,
        endpoint_name: &str,
        payload: &P,
    ) -> Result<Vec<u8>, InferenceError> {
        if payload.item_count() > self.batch_limit {
            return Err(InferenceError::MalformedPayload(format!(
                "{} items exceed the batch limit of {}",
                payload.item_count(),
                self.batch_limit
            )));
        }
        let body = serde_json::to_vec(payload)
            .map_err(|e| InferenceError::MalformedPayload(e.to_string()))?;

        // Credential refresh counts against the same deadline as the call
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, async {
            let credentials = self.credentials.credentials().await?;
            self.invoker.invoke(endpoint_name, body, &credentials).await
        })
        .await
        .map_err(|_| InferenceError::Timeout {
            endpoint: endpoint_name.to_string(),
            after: self.timeout,
        })
        .and_then(|inner| inner);

        match &result {
            Ok(response) => debug!(
                "{} answered {} items in {:.2?} ({} bytes)",
                endpoint_name,
                payload.item_count(),
                start.elapsed(),
                response.len()
            ),
            Err(e) => {
                error!("Call to {} failed after {:.2?}: {}", endpoint_name, start.elapsed(), e);
                if e.is_authentication() {
                    self.credentials.invalidate().await;
                }
            }
        }
        result
    }

    /// Embed a batch of records that share one product type.
    ///
    /// Returns one embedding per record, in record order.
    pub async fn embed(
        &self,
        endpoint_name: &str,
        records: &[InputRecord],
    ) -> Result<Vec<EmbeddingResult>, InferenceError> {
        let Some(first) = records.first() else {
            return Ok(Vec::new());
        };
        let request = EmbeddingRequest {
            physical_id: records.iter().map(|r| r.img_id.clone()).collect(),
            pt: first.product_type.clone(),
        };

        let response = self.invoke(endpoint_name, &request).await?;
        let decoded = decode_embeddings(&response).map_err(|e| {
            InferenceError::bad_response(endpoint_name, format!("undecodable embeddings: {}", e))
        })?;

        if decoded.embeddings.len() != records.len() {
            return Err(InferenceError::bad_response(
                endpoint_name,
                format!(
                    "returned {} embeddings for {} items",
                    decoded.embeddings.len(),
                    records.len()
                ),
            ));
        }

        Ok(records
            .iter()
            .zip(decoded.embeddings)
            .map(|(record, embedding)| EmbeddingResult {
                item_id: record.item_id.clone(),
                embedding,
            })
            .collect())
    }

    /// Look up nearest neighbors for a batch of embeddings.
    ///
    /// Results are attached to item ids by position.
    pub async fn lookup_neighbors(
        &self,
        endpoint_name: &str,
        embeddings: &[EmbeddingResult],
        product_type: &str,
        marketplace: &str,
    ) -> Result<Vec<NeighborResult>, InferenceError> {
        if embeddings.is_empty() {
            return Ok(Vec::new());
        }
        let request = NeighborRequest {
            embedding: embeddings.iter().map(|e| e.embedding.clone()).collect(),
            pt: product_type.to_string(),
            marketplace: marketplace.to_string(),
        };

        let response = self.invoke(endpoint_name, &request).await?;
        let decoded = decode_neighbors(&response).map_err(|e| {
            InferenceError::bad_response(endpoint_name, format!("undecodable neighbors: {}", e))
        })?;

        let ids = decoded.neighbor_item_ids;
        let distances = decoded.neighbor_item_ids_distances;
        if ids.len() != embeddings.len() || distances.len() != embeddings.len() {
            return Err(InferenceError::bad_response(
                endpoint_name,
                format!(
                    "returned {} neighbor lists and {} distance lists for {} items",
                    ids.len(),
                    distances.len(),
                    embeddings.len()
                ),
            ));
        }

        embeddings
            .iter()
            .zip(ids.into_iter().zip(distances))
            .map(|(embedding, (neighbor_item_ids, neighbors_dist))| {
                if neighbor_item_ids.len() != neighbors_dist.len() {
                    return Err(InferenceError::bad_response(
                        endpoint_name,
                        format!(
                            "item {} has {} neighbors but {} distances",
                            embedding.item_id,
                            neighbor_item_ids.len(),
                            neighbors_dist.len()
                        ),
                    ));
                }
                if let Some(bad) = neighbor_item_ids.iter().find(|id| id.contains(LIST_SEPARATOR)) {
                    return Err(InferenceError::bad_response(
                        endpoint_name,
                        format!(
                            "neighbor id {:?} of item {} contains '{}'",
                            bad, embedding.item_id, LIST_SEPARATOR
                        ),
                    ));
                }
                Ok(NeighborResult {
                    item_id: embedding.item_id.clone(),
                    neighbor_item_ids,
                    neighbors_dist,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialProvider, ScopedCredentials};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticProvider;

    #[async_trait]
    impl CredentialProvider for StaticProvider {
        async fn acquire_scoped_credentials(
            &self,
            _role_arn: &str,
            _account_id: &str,
        ) -> Result<ScopedCredentials, InferenceError> {
            Ok(ScopedCredentials {
                access_key_id: "AKIA".into(),
                secret_access_key: "secret".into(),
                session_token: None,
                expires_at: None,
            })
        }
    }

    /// Replies with canned bodies per endpoint and records request bodies.
    #[derive(Default)]
    struct ScriptedInvoker {
        replies: Mutex<Vec<(String, Result<Vec<u8>, InferenceError>)>>,
        requests: Mutex<Vec<(String, serde_json::Value)>>,
        delay: Option<Duration>,
    }

    impl ScriptedInvoker {
        fn reply(self, endpoint: &str, body: &str) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push((endpoint.to_string(), Ok(body.as_bytes().to_vec())));
            self
        }
    }

    #[async_trait]
    impl EndpointInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            endpoint_name: &str,
            body: Vec<u8>,
            _credentials: &ScopedCredentials,
        ) -> Result<Vec<u8>, InferenceError> {
            self.requests
                .lock()
                .unwrap()
                .push((endpoint_name.to_string(), serde_json::from_slice(&body).unwrap()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut replies = self.replies.lock().unwrap();
            let idx = replies
                .iter()
                .position(|(e, _)| e == endpoint_name)
                .expect("no scripted reply for endpoint");
            replies.remove(idx).1
        }
    }

    fn client(invoker: Arc<ScriptedInvoker>, batch_limit: usize) -> InferenceClient {
        let cache = Arc::new(CredentialCache::new(
            Arc::new(StaticProvider),
            "arn:aws:iam::123456789012:role/R",
            "123456789012",
        ));
        InferenceClient::new(invoker, cache, Duration::from_secs(5), batch_limit)
    }

    fn records(n: usize) -> Vec<InputRecord> {
        (0..n)
            .map(|i| InputRecord::new(format!("A{i}"), "000000", format!("img-{i}"), "FLAT_SHEET", i))
            .collect()
    }

    #[tokio::test]
    async fn test_embed_then_lookup() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .reply("embed", r#"{"embeddings": [[1.0, 0.0], [0.0, 1.0]]}"#)
                .reply(
                    "neighbors",
                    r#"{"neighbor_item_ids": [["X", "Y"], ["Z"]], "neighbor_item_ids_distances": [[0.1, 0.2], [0.3]]}"#,
                ),
        );
        let client = client(invoker.clone(), 32);
        let batch = records(2);

        let embeddings = client.embed("embed", &batch).await.unwrap();
        assert_eq!(embeddings[1].item_id, "A1");
        assert_eq!(embeddings[1].embedding, vec![0.0, 1.0]);

        let neighbors = client
            .lookup_neighbors("neighbors", &embeddings, "FLAT_SHEET", "US")
            .await
            .unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].item_id, "A0");
        assert_eq!(neighbors[0].neighbor_item_ids, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(neighbors[1].neighbors_dist, vec![0.3]);

        let requests = invoker.requests.lock().unwrap();
        assert_eq!(
            requests[0].1,
            serde_json::json!({"physical_id": ["img-0", "img-1"], "pt": "FLAT_SHEET"})
        );
        assert_eq!(requests[1].1["marketplace"], "US");
        assert_eq!(requests[1].1["embedding"], serde_json::json!([[1.0, 0.0], [0.0, 1.0]]));
    }

    #[tokio::test]
    async fn test_batch_limit_is_enforced_before_the_call() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let client = client(invoker.clone(), 2);

        let err = client.embed("embed", &records(3)).await.unwrap_err();
        assert!(matches!(err, InferenceError::MalformedPayload(_)));
        assert!(!err.is_transient());
        assert!(invoker.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_count_mismatch_is_endpoint_error() {
        let invoker = Arc::new(ScriptedInvoker::default().reply("embed", r#"{"embeddings": [[1.0]]}"#));
        let client = client(invoker, 32);

        let err = client.embed("embed", &records(2)).await.unwrap_err();
        assert!(matches!(err, InferenceError::Endpoint { retryable: false, .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_neighbor_length_mismatch_is_endpoint_error() {
        let invoker = Arc::new(ScriptedInvoker::default().reply(
            "neighbors",
            r#"{"neighbor_item_ids": [["X", "Y"]], "neighbor_item_ids_distances": [[0.1]]}"#,
        ));
        let client = client(invoker, 32);
        let embeddings = vec![EmbeddingResult {
            item_id: "A0".into(),
            embedding: vec![1.0],
        }];

        let err = client
            .lookup_neighbors("neighbors", &embeddings, "PT", "US")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 neighbors but 1 distances"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_endpoint_times_out() {
        let invoker = Arc::new(ScriptedInvoker {
            delay: Some(Duration::from_secs(60)),
            ..ScriptedInvoker::default()
        });
        let client = client(invoker, 32);

        let err = client.embed("embed", &records(1)).await.unwrap_err();
        assert!(matches!(err, InferenceError::Timeout { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_call() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let client = client(invoker.clone(), 32);

        assert!(client.embed("embed", &[]).await.unwrap().is_empty());
        assert!(client.lookup_neighbors("n", &[], "PT", "US").await.unwrap().is_empty());
        assert!(invoker.requests.lock().unwrap().is_empty());
    }

    /// STS stand-in that never answers.
    struct HangingProvider;

    #[async_trait]
    impl CredentialProvider for HangingProvider {
        async fn acquire_scoped_credentials(
            &self,
            _role_arn: &str,
            _account_id: &str,
        ) -> Result<ScopedCredentials, InferenceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(InferenceError::Authentication("sts never answered".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_credential_refresh_is_bounded_by_timeout() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let cache = Arc::new(CredentialCache::new(
            Arc::new(HangingProvider),
            "arn:aws:iam::123456789012:role/R",
            "123456789012",
        ));
        let client = InferenceClient::new(invoker.clone(), cache, Duration::from_secs(5), 32);

        let start = tokio::time::Instant::now();
        let err = client.embed("embed", &records(1)).await.unwrap_err();

        assert!(matches!(err, InferenceError::Timeout { .. }), "got {err}");
        assert!(start.elapsed() <= Duration::from_secs(6));
        assert!(invoker.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_neighbor_id_with_separator_is_rejected() {
        let invoker = Arc::new(ScriptedInvoker::default().reply(
            "neighbors",
            r#"{"neighbor_item_ids": [["X|Y"]], "neighbor_item_ids_distances": [[0.1]]}"#,
        ));
        let client = client(invoker, 32);
        let embeddings = vec![EmbeddingResult {
            item_id: "A0".into(),
            embedding: vec![1.0],
        }];

        let err = client
            .lookup_neighbors("neighbors", &embeddings, "PT", "US")
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Endpoint { retryable: false, .. }), "got {err}");
        assert!(err.to_string().contains("X|Y"));
    }
}
