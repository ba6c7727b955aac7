//! Cross-account credentials.
//!
//! The endpoints live in another account, so every call runs under a role
//! assumed through STS. The assumption is hidden behind [`CredentialProvider`]
//! and the resulting short-lived credentials are reused by
//! [`CredentialCache`] until they get close to expiry. Nothing is written to
//! disk.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::InferenceError;

/// Credentials are refreshed once they are this close to expiring
pub const DEFAULT_REFRESH_WINDOW_SECS: i64 = 300;

/// A temporary credential set scoped to the assumed role.
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// `None` for credentials that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl ScopedCredentials {
    /// True when the credentials expire at or before `now + window`.
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires_at| expires_at - window <= now)
            .unwrap_or(false)
    }
}

impl fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Capability to obtain credentials for `role_arn` in `account_id`.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire_scoped_credentials(
        &self,
        role_arn: &str,
        account_id: &str,
    ) -> Result<ScopedCredentials, InferenceError>;
}

/// Check that `role_arn` is an IAM role ARN owned by `account_id`.
///
/// `arn:aws:iam::123456789012:role/MyRole` belongs to `123456789012`.
pub fn check_role_account(role_arn: &str, account_id: &str) -> Result<(), InferenceError> {
    let parts: Vec<&str> = role_arn.splitn(6, ':').collect();
    let well_formed = parts.len() == 6
        && parts[0] == "arn"
        && parts[2] == "iam"
        && parts[5].starts_with("role/");
    if !well_formed {
        return Err(InferenceError::Authentication(format!(
            "malformed role ARN `{}`",
            role_arn
        )));
    }
    if parts[4] != account_id {
        return Err(InferenceError::Authentication(format!(
            "role {} belongs to account {}, expected {}",
            role_arn, parts[4], account_id
        )));
    }
    Ok(())
}

/// [`CredentialProvider`] backed by STS `AssumeRole`.
#[derive(Clone, Debug)]
pub struct StsCredentialProvider {
    client: aws_sdk_sts::Client,
    session_name: String,
}

impl StsCredentialProvider {
    pub fn new(config: &aws_config::SdkConfig, session_name: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(config),
            session_name: session_name.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StsCredentialProvider {
    async fn acquire_scoped_credentials(
        &self,
        role_arn: &str,
        account_id: &str,
    ) -> Result<ScopedCredentials, InferenceError> {
        check_role_account(role_arn, account_id)?;

        let output = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(&self.session_name)
            .send()
            .await
            .map_err(|e| {
                InferenceError::Authentication(format!(
                    "assuming {}: {}",
                    role_arn,
                    DisplayErrorContext(&e)
                ))
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            InferenceError::Authentication(format!("STS returned no credentials for {}", role_arn))
        })?;

        Ok(ScopedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: Some(credentials.session_token().to_string()),
            expires_at: DateTime::<Utc>::from_timestamp(credentials.expiration().secs(), 0),
        })
    }
}

/// Reuses one credential set across calls until it nears expiry.
///
/// The lock is held while acquiring, so concurrent callers wait for a single
/// STS round trip instead of each assuming the role.
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    role_arn: String,
    account_id: String,
    refresh_window: Duration,
    current: Mutex<Option<ScopedCredentials>>,
}

impl CredentialCache {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        role_arn: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            role_arn: role_arn.into(),
            account_id: account_id.into(),
            refresh_window: Duration::seconds(DEFAULT_REFRESH_WINDOW_SECS),
            current: Mutex::new(None),
        }
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    /// Cached credentials, or a fresh set if none are cached or they are expiring.
    pub async fn credentials(&self) -> Result<ScopedCredentials, InferenceError> {
        let mut current = self.current.lock().await;
        if let Some(credentials) = current.as_ref() {
            if !credentials.expires_within(self.refresh_window, Utc::now()) {
                return Ok(credentials.clone());
            }
            debug!("Cached credentials for {} are expiring, refreshing", self.role_arn);
        }

        let fresh = self
            .provider
            .acquire_scoped_credentials(&self.role_arn, &self.account_id)
            .await
            .map_err(|e| {
                warn!("Failed to assume {}: {}", self.role_arn, e);
                e
            })?;
        info!(
            "Assumed role {} (expires at {})",
            self.role_arn,
            fresh
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        *current = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached set so the next call re-assumes the role.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}
