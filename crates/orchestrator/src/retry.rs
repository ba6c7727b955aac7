//! Bounded retries with exponential backoff for endpoint calls.

use std::future::Future;
use std::time::Duration;

use ml_client::InferenceError;
use rand::Rng;
use tracing::warn;

/// Doubling stops after this many retries
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// How often and how patiently a transient failure is retried.
///
/// Only errors for which [`InferenceError::is_transient`] holds are retried.
/// Retry `n` (1-based) waits `initial_backoff * 2^(n-1)` plus up to half of
/// that again as jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
}

/// Result of a retried call along with how many attempts it took
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, InferenceError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff before retry `retry` without jitter.
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.initial_backoff * (1u32 << exponent)
    }

    fn backoff_with_jitter(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        let jitter_ms = (base.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Retried<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(err) if err.is_transient() && attempts <= self.max_retries => {
                    let delay = self.backoff_with_jitter(attempts);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:.2?}: {}",
                        label,
                        attempts,
                        self.max_retries + 1,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Retried {
                        result: Err(err),
                        attempts,
                    };
                }
            }
        }
    }
}
