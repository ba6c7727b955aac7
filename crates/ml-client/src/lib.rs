//! Client for the embedding and neighbor-lookup inference endpoints.
//!
//! Both endpoints are hosted in another AWS account and invoked
//! synchronously, one batch per call. This crate handles:
//! - Assuming the cross-account role and caching the scoped credentials
//! - Building the JSON request bodies and decoding the responses
//! - Bounding every call by a timeout
//! - Classifying failures as transient (worth retrying) or permanent
//!
//! Retry scheduling is left to the caller; [`InferenceError::is_transient`]
//! tells it which failures qualify.
//!
//! ## Components
//!
//! - [`CredentialProvider`] / [`StsCredentialProvider`]: role assumption
//! - [`CredentialCache`]: reuses credentials until they near expiry
//! - [`EndpointInvoker`] / [`SageMakerInvoker`]: a single raw round trip
//! - [`InferenceClient`]: typed `embed` and `lookup_neighbors` calls
//!
//! ## Example Usage
//!
//! ```ignore
//! let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
//! let provider = Arc::new(StsCredentialProvider::new(&sdk_config, "recs-batch"));
//! let cache = Arc::new(CredentialCache::new(provider, role_arn, account_id));
//! let invoker = Arc::new(SageMakerInvoker::new("us-east-1"));
//! let client = InferenceClient::new(invoker, cache, Duration::from_secs(60), 32);
//!
//! let embeddings = client.embed("image-embedder", &batch).await?;
//! let neighbors = client
//!     .lookup_neighbors("knn-lookup", &embeddings, "FLAT_SHEET", "US")
//!     .await?;
//! ```

pub mod client;
pub mod credentials;
pub mod error;
pub mod invoker;
pub mod payload;

pub use client::InferenceClient;
pub use credentials::{
    check_role_account, CredentialCache, CredentialProvider, ScopedCredentials,
    StsCredentialProvider, DEFAULT_REFRESH_WINDOW_SECS,
};
pub use error::{is_retryable_status, InferenceError};
pub use invoker::{EndpointInvoker, SageMakerInvoker};
pub use payload::{
    decode_embeddings, decode_neighbors, BatchPayload, EmbeddingRequest, EmbeddingResponse,
    NeighborRequest, NeighborResponse,
};
