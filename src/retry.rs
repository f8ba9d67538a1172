//! Bounded exponential backoff around one adapter call.
//!
//! ```text
//! Attempting --ok--------------------------> Succeeded
//!     |  \--non-timeout error-------------> (propagated)
//!     \--timeout--> Retrying (attempt < max, budget *= multiplier) --> Attempting
//!                \-> Exhausted (attempt == max)
//! ```

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::adapter::{Adapter, CompressionMetrics};
use crate::config::TimeoutPolicy;
use crate::error::{RecompressError, Result};

/// Internal progress of one supervised call.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState<T> {
    Attempting { attempt: u32, timeout: Duration },
    Retrying { attempt: u32, timeout: Duration },
    Succeeded { value: T, attempt: u32, timeout: Duration },
    Exhausted { attempts: u32, last_timeout: Duration },
}

/// Terminal result. Hard failures are not represented here; they surface as
/// `Err` from [`RetrySupervisor::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Succeeded {
        value: T,
        attempts: u32,
        /// Budget of the attempt that succeeded.
        timeout: Duration,
    },
    Exhausted {
        attempts: u32,
        last_timeout: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySupervisor {
    max_attempts: u32,
    multiplier: u32,
}

impl Default for RetrySupervisor {
    fn default() -> Self {
        Self::new(6, 2)
    }
}

impl RetrySupervisor {
    pub fn new(max_attempts: u32, multiplier: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            multiplier: multiplier.max(1),
        }
    }

    pub fn from_policy(policy: &TimeoutPolicy) -> Self {
        Self::new(policy.retry_max, policy.backoff_multiplier)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Drive `op(timeout, attempt)` until it succeeds, fails hard, or every
    /// attempt has timed out.
    pub fn run<T, F>(&self, initial: Duration, mut op: F) -> Result<RetryOutcome<T>>
    where
        F: FnMut(Duration, u32) -> Result<T>,
    {
        let mut state = RetryState::Attempting {
            attempt: 1,
            timeout: initial,
        };
        loop {
            state = match state {
                RetryState::Attempting { attempt, timeout } => match op(timeout, attempt) {
                    Ok(value) => RetryState::Succeeded {
                        value,
                        attempt,
                        timeout,
                    },
                    Err(e) if e.is_retryable() => self.after_timeout(attempt, timeout),
                    Err(e) => return Err(e),
                },
                RetryState::Retrying { attempt, timeout } => {
                    warn!(
                        timeout_secs = timeout.as_secs(),
                        attempt,
                        max = self.max_attempts,
                        "timeout, retrying with a larger budget"
                    );
                    RetryState::Attempting { attempt, timeout }
                }
                RetryState::Exhausted {
                    attempts,
                    last_timeout,
                } => {
                    return Ok(RetryOutcome::Exhausted {
                        attempts,
                        last_timeout,
                    })
                }
                RetryState::Succeeded {
                    value,
                    attempt,
                    timeout,
                } => {
                    return Ok(RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                        timeout,
                    })
                }
            };
        }
    }

    fn after_timeout<T>(&self, attempt: u32, timeout: Duration) -> RetryState<T> {
        if attempt >= self.max_attempts {
            RetryState::Exhausted {
                attempts: attempt,
                last_timeout: timeout,
            }
        } else {
            RetryState::Retrying {
                attempt: attempt + 1,
                timeout: timeout.saturating_mul(self.multiplier),
            }
        }
    }

    /// Supervised [`Adapter::compress`].
    pub fn compress(
        &self,
        adapter: &dyn Adapter,
        input: &Path,
        output: &Path,
        initial: Duration,
    ) -> Result<RetryOutcome<CompressionMetrics>> {
        self.run(initial, |timeout, _| adapter.compress(input, output, timeout))
    }
}

impl<T> RetryOutcome<T> {
    /// Convert exhaustion into the fatal error used when nothing better exists.
    pub fn into_result(self, copies: u32) -> Result<(T, u32)> {
        match self {
            RetryOutcome::Succeeded { value, attempts, .. } => Ok((value, attempts)),
            RetryOutcome::Exhausted {
                attempts,
                last_timeout,
            } => Err(RecompressError::RetriesExhausted {
                copies,
                attempts,
                last_timeout_secs: last_timeout.as_secs(),
            }),
        }
    }
}
