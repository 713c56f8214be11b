//! Bounded retry with exponential backoff for source fetches.
//!
//! Every fetcher call goes through [`RetryPolicy::execute`]. The policy
//! wraps each attempt in a timeout, retries only [`FetchError::Transient`]
//! failures, and records every attempt as a [`FetchAttempt`] so the run
//! report can show how hard a partition was tried.
//!
//! With the defaults (3 attempts, 2s base, x2, +/-25% jitter) a partition
//! that keeps failing waits roughly 2s then 4s before giving up.
//! [`RetryPolicy::execute_until_cancelled`] stops retrying as soon as its
//! token is cancelled, including mid-backoff.

use std::future::Future;
use std::time::{Duration, Instant};

use divvy_lake_ingest_models::{AttemptOutcome, FetchAttempt};
use tokio_util::sync::CancellationToken;

use crate::FetchError;

/// Fraction of the computed delay that jitter may add or remove.
const JITTER_FRACTION: f64 = 0.25;

/// Retry settings shared by all fetchers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor applied to the delay after each attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomize delays by up to +/-25%.
    pub jitter: bool,
    /// Per-attempt timeout. Expiry counts as a transient failure.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Result of [`RetryPolicy::execute`]: the final result plus every attempt
/// that led to it.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, FetchError>,
    pub attempts: Vec<FetchAttempt>,
}

impl<T> RetryOutcome<T> {
    /// Number of calls that were made.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based),
    /// before jitter.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::random::<f64>().mul_add(2.0 * JITTER_FRACTION, 1.0 - JITTER_FRACTION);
        delay.mul_f64(factor)
    }

    /// Runs `op` until it succeeds, fails permanently, or `max_attempts`
    /// calls have been made.
    ///
    /// `op` is called once per attempt to build a fresh future. `label` is
    /// only used for log messages.
    #[allow(clippy::future_not_send)]
    pub async fn execute<T, F, Fut>(&self, label: &str, op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.execute_until_cancelled(label, &CancellationToken::new(), op)
            .await
    }

    /// Like [`Self::execute`], but makes no further attempts once `cancel`
    /// fires. A backoff sleep in progress is cut short and the last error is
    /// returned. An attempt already running is left to finish.
    #[allow(clippy::future_not_send)]
    pub async fn execute_until_cancelled<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = Vec::new();

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let (result, timed_out) = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => (result, false),
                Err(_) => (
                    Err(FetchError::transient(format!(
                        "attempt timed out after {:?}",
                        self.timeout
                    ))),
                    true,
                ),
            };
            let elapsed = started.elapsed();

            let error = match result {
                Ok(value) => {
                    attempts.push(FetchAttempt {
                        attempt,
                        outcome: AttemptOutcome::Success,
                        detail: None,
                        elapsed,
                    });
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            let outcome = if timed_out {
                AttemptOutcome::Timeout
            } else if error.is_transient() {
                AttemptOutcome::TransientFailure
            } else {
                AttemptOutcome::PermanentFailure
            };
            attempts.push(FetchAttempt {
                attempt,
                outcome,
                detail: Some(error.message().to_string()),
                elapsed,
            });

            if !error.is_transient() {
                log::error!("[{label}] {error} (not retrying)");
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            if attempt == max_attempts {
                log::error!("[{label}] {error} after {attempt} attempt(s), giving up");
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            if cancel.is_cancelled() {
                log::warn!("[{label}] {error}; cancelled, not retrying");
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            let delay = self.jittered(self.backoff_delay(attempt));
            log::warn!("[{label}] attempt {attempt}/{max_attempts} failed: {error}; retrying in {delay:?}");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    log::warn!("[{label}] cancelled during backoff, not retrying");
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }
            }
        }

        RetryOutcome {
            result: Err(FetchError::transient("no attempts were made")),
            attempts,
        }
    }
}
