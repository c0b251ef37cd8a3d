//! Retry policy for remote operations.
//!
//! Transient errors are retried with exponential backoff (factor 2, capped);
//! permanent errors are returned immediately.

use crate::models::config::DownloadConfig;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

const BACKOFF_FACTOR: u32 = 2;

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(BACKOFF_FACTOR.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`; `attempt` is the number of the next attempt.
    Retry { attempt: u32, delay: Duration },
    /// Stop; `attempts` were made.
    GiveUp { attempts: u32 },
}

/// Retry state for one operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Register the start of an attempt.
    pub fn begin(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Decide whether the failed attempt should be retried.
    pub fn on_failure(&self, error: &Error) -> RetryDecision {
        if !error.is_transient() || self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        RetryDecision::Retry {
            attempt: self.attempts + 1,
            delay: self.policy.delay_for(self.attempts),
        }
    }
}

/// A failed retried operation.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: Error,
    /// Cancelled while waiting to retry.
    pub cancelled: bool,
}

impl RetryFailure {
    /// The error was transient and every attempt was used.
    pub fn exhausted(&self) -> bool {
        !self.cancelled && self.error.is_transient()
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Waiting between attempts stops early when `cancel` fires; the last error
/// is returned in that case.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> std::result::Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(policy.clone());
    loop {
        let attempt = backoff.begin();
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match backoff.on_failure(&error) {
            RetryDecision::GiveUp { attempts } => {
                return Err(RetryFailure {
                    attempts,
                    error,
                    cancelled: false,
                });
            }
            RetryDecision::Retry { attempt, delay } => {
                tracing::warn!(
                    "{} failed ({}), retrying in {:?} (attempt {}/{})",
                    op_name,
                    error,
                    delay,
                    attempt,
                    policy.max_attempts
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("{} cancelled before attempt {}", op_name, attempt);
                        return Err(RetryFailure {
                            attempts: backoff.attempts(),
                            error,
                            cancelled: true,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
