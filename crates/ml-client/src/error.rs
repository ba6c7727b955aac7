use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when calling an inference endpoint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Scoped credentials could not be acquired or were rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The endpoint returned a non-success status or an unusable response
    #[error("Endpoint {endpoint} failed: {message}")]
    Endpoint {
        endpoint: String,
        status: Option<u16>,
        message: String,
        retryable: bool,
    },

    /// No response within the per-call timeout
    #[error("Endpoint {endpoint} timed out after {after:?}")]
    Timeout { endpoint: String, after: Duration },

    /// The request itself is invalid (too many items, unserializable)
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl InferenceError {
    /// Whether retrying the same call could succeed.
    ///
    /// Only timeouts and endpoint errors flagged retryable qualify;
    /// authentication and payload errors fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Timeout { .. } => true,
            InferenceError::Endpoint { retryable, .. } => *retryable,
            InferenceError::Authentication(_) | InferenceError::MalformedPayload(_) => false,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, InferenceError::Authentication(_))
    }

    /// Non-retryable endpoint error for a response we could not use.
    pub(crate) fn bad_response(endpoint: &str, message: impl Into<String>) -> Self {
        InferenceError::Endpoint {
            endpoint: endpoint.to_string(),
            status: None,
            message: message.into(),
            retryable: false,
        }
    }
}

/// Throttling and server-side statuses are worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
