//! Bounded exponential backoff around single provider calls
//!
//! Transient failures are retried after `base * 2^attempt`; permanent ones
//! are returned immediately. There is no jitter and no per-call timeout
//! beyond the transport default, and a backoff sleep cannot be cancelled.

use log::{error, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DriveError, IngestError};

/// Retry limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Runs provider calls under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleep: Sleeper,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleep: Arc::new(std::thread::sleep),
        }
    }

    /// Replace the blocking sleep, e.g. to record delays in tests
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of attempts
    ///
    /// `context` only labels log lines and errors.
    pub fn execute<T>(
        &self,
        context: &str,
        mut operation: impl FnMut() -> Result<T, DriveError>,
    ) -> Result<T, IngestError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(DriveError::Permanent { status, message }) => {
                    return Err(IngestError::PermanentApi {
                        status,
                        message: format!("{context}: {message}"),
                    });
                }
                Err(DriveError::Transient(message)) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        error!("{context} failed after {max_attempts} attempts: {message}");
                        return Err(IngestError::TransientExhausted {
                            attempts: attempt,
                            last: message,
                        });
                    }

                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        "{context} failed (attempt {attempt}/{max_attempts}): {message}. Retrying in {delay:?}..."
                    );
                    (self.sleep)(delay);
                }
            }
        }
    }
}
