//! Bounded retry for classification calls
//!
//! Each attempt runs under a per-attempt timeout. Retryable failures
//! (timeout, unavailable, rate limited) back off exponentially with jitter;
//! a rate limit waits for the delay the service suggested instead. Malformed
//! output is permanent and returned immediately. The run's cancellation
//! token aborts both in-flight attempts and backoff sleeps.

use crate::config::ClassificationConfig;
use crate::errors::ClassificationError;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy for one adapter call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub factor: f32,
    pub jitter: bool,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ClassificationConfig::default())
    }
}

impl From<&ClassificationConfig> for RetryPolicy {
    fn from(cfg: &ClassificationConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
            factor: cfg.backoff_multiplier,
            jitter: cfg.jitter,
            attempt_timeout: cfg.call_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Delay sequence, one entry per permitted retry
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.factor)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        }
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: usize,
        last: ClassificationError,
    },

    #[error("permanent failure: {0}")]
    Permanent(ClassificationError),

    #[error("cancelled")]
    Cancelled,
}

/// Run `operation` under `policy`, aborting when `cancel` fires.
pub async fn call_with_retry<F, Fut, T>(
    mut operation: F,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClassificationError>>,
{
    let mut delays = policy.delays();
    let mut attempt = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = tokio::time::timeout(policy.attempt_timeout, operation()) => outcome,
        };

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => ClassificationError::Timeout(policy.attempt_timeout),
        };

        if !err.is_retryable() {
            tracing::warn!(adapter = label, attempt, error = %err, "Classification failed permanently");
            return Err(RetryError::Permanent(err));
        }

        let Some(backoff) = delays.next() else {
            tracing::warn!(adapter = label, attempts = attempt, error = %err, "Classification retries exhausted");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        };
        let delay = err
            .suggested_backoff()
            .map_or(backoff, |hint| hint.min(policy.max_backoff));

        tracing::warn!(
            adapter = label,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Classification attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
