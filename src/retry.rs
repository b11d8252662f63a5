//! Retry policy and the generic retry runner.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::{ClassifierConfig, ErrorClass, classify};
use crate::error::ClientError;

/// Retry decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after a delay.
    RetryAfter(Duration),
    /// Do not retry.
    DoNotRetry,
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt) for
    /// transport-level failures.
    pub max_attempts: usize,
    /// Attempt ceiling for GraphQL transient-error matches. The backend
    /// advises longer backoff for these, so the ceiling is higher.
    pub graphql_transient_attempts: usize,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum jitter to add to delays.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            graphql_transient_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_jitter: Duration::from_millis(150),
        }
    }
}

impl RetryPolicy {
    /// Policy with no delays, for tests.
    #[must_use]
    pub const fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            graphql_transient_attempts: max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Decide whether to retry based on the classified error and attempt
    /// count (1-based).
    #[must_use]
    pub fn decide(&self, error: &ClientError, class: ErrorClass, attempt: usize) -> RetryDecision {
        if class == ErrorClass::Permanent {
            return RetryDecision::DoNotRetry;
        }
        let ceiling = if matches!(error, ClientError::Graphql { .. }) {
            self.graphql_transient_attempts
        } else {
            self.max_attempts
        };
        if attempt >= ceiling {
            return RetryDecision::DoNotRetry;
        }

        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let exp =
            2_u64.saturating_pow(u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        let mut delay_ms = base_ms.saturating_mul(exp);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        if delay_ms > max_ms {
            delay_ms = max_ms;
        }
        let jitter_ms = if self.max_jitter.as_millis() > 0 {
            let mut rng = rand::thread_rng();
            let jitter_max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
            rng.gen_range(0..=jitter_max)
        } else {
            0
        };
        RetryDecision::RetryAfter(Duration::from_millis(delay_ms + jitter_ms))
    }
}

/// Context carried across the attempts of one retry-wrapped call.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    /// Current attempt number, 1-based.
    pub attempt: usize,
    /// Classification of the most recent failure, if any.
    pub last_class: Option<ErrorClass>,
    /// Total backoff delay slept so far.
    pub elapsed_delay: Duration,
}

impl RetryContext {
    const fn new() -> Self {
        Self {
            attempt: 1,
            last_class: None,
            elapsed_delay: Duration::ZERO,
        }
    }
}

/// Run `op` under the retry policy.
///
/// Each invocation of `op` is one attempt. Failures are classified with
/// [`classify`]; permanent failures propagate immediately, retryable ones
/// sleep and re-invoke `op` up to the policy ceiling, after which the last
/// failure propagates as-is. Cancellation aborts the in-flight attempt and
/// the backoff sleep without consuming an attempt slot.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    config: &ClassifierConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut ctx = RetryContext::new();
    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let result = tokio::select! {
            () = cancel.cancelled() => return Err(ClientError::Cancelled),
            result = op() => result,
        };
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if matches!(err, ClientError::Cancelled) {
            return Err(err);
        }

        let class = classify(&err, config);
        ctx.last_class = Some(class);
        match policy.decide(&err, class, ctx.attempt) {
            RetryDecision::DoNotRetry => {
                if ctx.attempt > 1 {
                    debug!(
                        attempts = ctx.attempt,
                        last_class = ?ctx.last_class,
                        elapsed_delay_ms =
                            u64::try_from(ctx.elapsed_delay.as_millis()).unwrap_or(u64::MAX),
                        "giving up after retries"
                    );
                }
                return Err(err);
            }
            RetryDecision::RetryAfter(delay) => {
                debug!(
                    attempt = ctx.attempt,
                    class = ?class,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "retrying request"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(ClientError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                ctx.elapsed_delay += delay;
                ctx.attempt += 1;
            }
        }
    }
}
