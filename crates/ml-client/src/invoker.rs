//! Transport for a single endpoint round trip.

use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_sagemakerruntime::config::http::HttpResponse;
use aws_sdk_sagemakerruntime::config::retry::RetryConfig;
use aws_sdk_sagemakerruntime::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_sagemakerruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sagemakerruntime::operation::invoke_endpoint::InvokeEndpointError;
use aws_sdk_sagemakerruntime::primitives::Blob;
use aws_sdk_sagemakerruntime::Client;
use tracing::debug;

use crate::credentials::ScopedCredentials;
use crate::error::{is_retryable_status, InferenceError};

const JSON: &str = "application/json";

/// Service error codes meaning the assumed credentials were refused
const AUTH_ERROR_CODES: [&str; 4] = [
    "AccessDeniedException",
    "ExpiredTokenException",
    "UnrecognizedClientException",
    "InvalidSignatureException",
];

/// Service error codes worth another attempt
const TRANSIENT_ERROR_CODES: [&str; 5] = [
    "ServiceUnavailable",
    "InternalFailure",
    "InternalDependencyException",
    "ModelNotReadyException",
    "ThrottlingException",
];

/// Sends one serialized request to a named endpoint and returns the raw body.
#[async_trait]
pub trait EndpointInvoker: Send + Sync {
    async fn invoke(
        &self,
        endpoint_name: &str,
        body: Vec<u8>,
        credentials: &ScopedCredentials,
    ) -> Result<Vec<u8>, InferenceError>;
}

/// [`EndpointInvoker`] over the SageMaker runtime `InvokeEndpoint` API.
///
/// A runtime client is built per credential set and reused until the
/// credentials rotate. SDK-level retries are off: every `invoke` is exactly
/// one request, and the caller's retry policy decides what happens next.
pub struct SageMakerInvoker {
    region: String,
    client: Mutex<Option<(String, Client)>>,
}

impl SageMakerInvoker {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            client: Mutex::new(None),
        }
    }

    fn client_for(&self, credentials: &ScopedCredentials) -> Client {
        let mut cached = self.client.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((key_id, client)) = cached.as_ref() {
            if *key_id == credentials.access_key_id {
                return client.clone();
            }
        }

        debug!("Building SageMaker runtime client in {}", self.region);
        let provider = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            credentials.expires_at.map(Into::into),
            "assumed-role",
        );
        let client = Client::from_conf(runtime_config(&self.region, provider));
        *cached = Some((credentials.access_key_id.clone(), client.clone()));
        client
    }
}

#[async_trait]
impl EndpointInvoker for SageMakerInvoker {
    async fn invoke(
        &self,
        endpoint_name: &str,
        body: Vec<u8>,
        credentials: &ScopedCredentials,
    ) -> Result<Vec<u8>, InferenceError> {
        let client = self.client_for(credentials);
        let output = client
            .invoke_endpoint()
            .endpoint_name(endpoint_name)
            .content_type(JSON)
            .accept(JSON)
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| classify_sdk_error(endpoint_name, e))?;

        output
            .body()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| InferenceError::bad_response(endpoint_name, "response has no body"))
    }
}

fn runtime_config(region: &str, credentials: Credentials) -> aws_sdk_sagemakerruntime::Config {
    aws_sdk_sagemakerruntime::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .retry_config(RetryConfig::disabled())
        .build()
}

fn classify_sdk_error(
    endpoint: &str,
    err: SdkError<InvokeEndpointError, HttpResponse>,
) -> InferenceError {
    let message = DisplayErrorContext(&err).to_string();
    let status = err.raw_response().map(|response| response.status().as_u16());
    match &err {
        SdkError::ServiceError(context) => {
            let code = context.err().code().unwrap_or("Unknown");
            if AUTH_ERROR_CODES.contains(&code) {
                return InferenceError::Authentication(message);
            }
            let retryable = TRANSIENT_ERROR_CODES.contains(&code)
                || status.map(is_retryable_status).unwrap_or(false);
            InferenceError::Endpoint {
                endpoint: endpoint.to_string(),
                status,
                message,
                retryable,
            }
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            InferenceError::Endpoint {
                endpoint: endpoint.to_string(),
                status,
                message,
                retryable: true,
            }
        }
        _ => InferenceError::Endpoint {
            endpoint: endpoint.to_string(),
            status,
            message,
            retryable: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_sagemakerruntime::error::ErrorMetadata;
    use aws_smithy_types::body::SdkBody;

    fn service_error(code: Option<&str>, status: u16) -> InferenceError {
        let mut meta = ErrorMetadata::builder().message("endpoint said no");
        if let Some(code) = code {
            meta = meta.code(code);
        }
        let err = SdkError::service_error(
            InvokeEndpointError::generic(meta.build()),
            HttpResponse::new(status.try_into().unwrap(), SdkBody::empty()),
        );
        classify_sdk_error("neighbor-endpoint", err)
    }

    #[test]
    fn test_access_denied_is_authentication() {
        let err = service_error(Some("AccessDeniedException"), 403);
        assert!(err.is_authentication(), "got {err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_expired_token_is_authentication() {
        let err = service_error(Some("ExpiredTokenException"), 400);
        assert!(err.is_authentication(), "got {err}");
    }

    #[test]
    fn test_throttling_code_is_transient() {
        let err = service_error(Some("ThrottlingException"), 400);
        assert!(
            matches!(err, InferenceError::Endpoint { status: Some(400), retryable: true, .. }),
            "got {err}"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_retryable_statuses_without_known_code() {
        for status in [429, 503] {
            let err = service_error(None, status);
            assert!(
                matches!(err, InferenceError::Endpoint { status: Some(s), retryable: true, .. } if s == status),
                "got {err}"
            );
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_bad_request_is_permanent() {
        let err = service_error(Some("ValidationError"), 400);
        assert!(matches!(err, InferenceError::Endpoint { retryable: false, .. }), "got {err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transport_timeout_is_transient() {
        let err = classify_sdk_error(
            "embedding-endpoint",
            SdkError::timeout_error("no response from endpoint"),
        );
        assert!(matches!(err, InferenceError::Endpoint { status: None, retryable: true, .. }), "got {err}");
    }

    #[test]
    fn test_runtime_client_makes_a_single_attempt() {
        let credentials = Credentials::new("AKIA", "secret", None, None, "test");
        let config = runtime_config("us-east-2", credentials);
        let retry = config.retry_config().expect("retry config is set");
        assert_eq!(retry.max_attempts(), 1);
    }
}
