//! Retry policies
//!
//! Bounded retry with fixed or linearly escalating delay. Policies are
//! plain value objects; the concrete schedules the coordinator uses are
//! exposed as named constructors.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffSchedule {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `attempt * step + base`, escalating with the retry index.
    Linear { step: Duration, base: Duration },
}

/// Bounded retry policy: how many retries, and how long to wait between
/// them. `max_attempts` counts retries, excluding the initial call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub schedule: BackoffSchedule,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, schedule: BackoffSchedule) -> Self {
        Self {
            max_attempts,
            schedule,
        }
    }

    /// Profile fetch: 3 retries, fixed 500ms apart.
    #[must_use]
    pub fn profile_fetch() -> Self {
        Self::new(3, BackoffSchedule::Fixed(Duration::from_millis(500)))
    }

    /// Session-check aborts: 5 retries, `attempt * 200ms + 300ms`.
    #[must_use]
    pub fn session_check_abort() -> Self {
        Self::new(
            5,
            BackoffSchedule::Linear {
                step: Duration::from_millis(200),
                base: Duration::from_millis(300),
            },
        )
    }

    /// Other session-check errors: 5 retries, flat 600ms.
    #[must_use]
    pub fn session_check_flat() -> Self {
        Self::new(5, BackoffSchedule::Fixed(Duration::from_millis(600)))
    }

    /// Whether another retry is allowed after `attempt` retries so far.
    #[must_use]
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.schedule {
            BackoffSchedule::Fixed(delay) => delay,
            BackoffSchedule::Linear { step, base } => step * attempt + base,
        }
    }
}

/// Trait for errors that can indicate whether they're retryable.
pub trait RetryableError {
    /// Returns true if this error is retryable.
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation under a retry policy.
///
/// Only retryable errors consume the retry budget; anything else
/// propagates immediately. Exhaustion returns the last error.
pub async fn with_retry<F, Fut, T, E>(policy: BackoffPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() || !policy.can_retry(attempt) {
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
