//! Bounded retry with exponential backoff
//!
//! [`RetryExecutor`] re-runs an async operation until it succeeds, fails with a
//! non-retryable error, or exhausts `max_retries`.

use super::classifier::classify;
use crate::utils::error::{ClassifiedError, RawError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Upper bound of the random jitter added to each backoff delay
pub const JITTER_CEILING_MS: u64 = 1_000;

/// Retry policy for one class of operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryOptions {
    /// Backoff before the retry that follows `attempt` (0-based), without jitter
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay_ms as f64 * self.exponential_base.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            scaled.max(0.0) as u64
        }
    }

    /// Total number of times the operation may be invoked
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Bookkeeping for one retried operation
#[derive(Debug, Clone, PartialEq)]
pub struct UploadAttempt {
    pub context: String,
    /// Number of times the operation was invoked
    pub attempts: u32,
    pub last_error: Option<ClassifiedError>,
    pub cumulative_delay: Duration,
}

impl UploadAttempt {
    fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            attempts: 0,
            last_error: None,
            cumulative_delay: Duration::ZERO,
        }
    }
}

/// Runs operations under a [`RetryOptions`] policy
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    options: RetryOptions,
}

impl RetryExecutor {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Runs `operation`, returning its value or the last classified error
    pub async fn run<T, F, Fut>(&self, context: &str, operation: F) -> Result<T, ClassifiedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        self.run_tracked(context, operation).await.0
    }

    /// Like [`run`](Self::run) but also returns the attempt record
    ///
    /// The closure receives the 0-based attempt number.
    pub async fn run_tracked<T, F, Fut>(
        &self,
        context: &str,
        mut operation: F,
    ) -> (Result<T, ClassifiedError>, UploadAttempt)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let mut record = UploadAttempt::new(context);

        for attempt in 0..=self.options.max_retries {
            record.attempts = attempt.saturating_add(1);

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!("{} succeeded after {} attempts", context, record.attempts);
                    }
                    return (Ok(value), record);
                }
                Err(raw) => classify(&raw, context),
            };

            let retryable = error.retryable;
            record.last_error = Some(error.clone());

            if !retryable {
                tracing::warn!("{} failed with non-retryable {} error: {}", context, error.kind, error.source);
                return (Err(error), record);
            }

            if attempt == self.options.max_retries {
                tracing::warn!(
                    "{} failed after {} attempts: {}",
                    context,
                    record.attempts,
                    error.source
                );
                return (Err(error), record);
            }

            let delay = self.delay_for(attempt);
            tracing::debug!(
                "{} attempt {} failed ({}), retrying in {}ms",
                context,
                record.attempts,
                error.kind,
                delay.as_millis()
            );
            record.cumulative_delay = record.cumulative_delay.saturating_add(delay);
            tokio::time::sleep(delay).await;
        }

        // The loop always returns on its final iteration
        let error = record
            .last_error
            .clone()
            .unwrap_or_else(|| ClassifiedError::invalid_input(context, "retry loop ran zero times"));
        (Err(error), record)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay_ms = self.options.backoff_ms(attempt);
        if self.options.jitter {
            delay_ms = delay_ms.saturating_add(rand::rng().random_range(0..=JITTER_CEILING_MS));
        }
        Duration::from_millis(delay_ms)
    }
}
