//! Bounded fixed-interval retry.
//!
//! A [`RetryPolicy`] polls a probe until an acceptance predicate holds, an
//! error the caller marks as fatal shows up, or the overall deadline passes.
//!
//! Timing guarantees:
//! - at least one attempt is made, however short the deadline
//! - an accepted result returns immediately, with no trailing sleep
//! - no attempt starts once the deadline has elapsed
//! - a timeout is reported no earlier than the deadline and no later than the
//!   deadline plus one interval (plus the duration of the last probe)

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::FixtureError;

/// Deadline and poll interval for a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    deadline: Duration,
    interval: Duration,
}

/// Why a [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The deadline passed without an accepted result.
    Timeout {
        deadline: Duration,
        elapsed: Duration,
        attempts: u32,
        /// Debug rendering of the last rejected result or retried error.
        last: String,
    },
    /// The probe returned an error classified as non-retryable.
    Fatal(E),
}

impl<E: fmt::Display> RetryError<E> {
    /// Convert into the crate error, mapping fatal errors with `fatal`.
    pub fn into_fixture_error(self, fatal: impl FnOnce(E) -> FixtureError) -> FixtureError {
        match self {
            RetryError::Timeout {
                deadline,
                attempts,
                last,
                ..
            } => FixtureError::ReadinessTimeout {
                deadline,
                attempts,
                last,
            },
            RetryError::Fatal(e) => fatal(e),
        }
    }
}

impl RetryPolicy {
    /// Deadline of the generic "engine reports running" check.
    pub const ENGINE_DEADLINE: Duration = Duration::from_secs(60);
    /// Default poll interval of the engine check.
    pub const ENGINE_INTERVAL: Duration = Duration::from_millis(500);
    /// Deadline of service-level probes layered on top.
    pub const SERVICE_DEADLINE: Duration = Duration::from_secs(120);
    /// Poll interval of service-level probes.
    pub const SERVICE_INTERVAL: Duration = Duration::from_secs(10);

    /// Create a policy. Both durations must be non-zero.
    pub fn new(deadline: Duration, interval: Duration) -> Result<Self, FixtureError> {
        if deadline.is_zero() || interval.is_zero() {
            return Err(FixtureError::InvalidConfiguration {
                reason: format!(
                    "retry deadline and interval must be positive (got {deadline:?} / {interval:?})"
                ),
            });
        }
        Ok(Self { deadline, interval })
    }

    /// Policy for waiting on the engine to report a container running.
    pub fn engine_default() -> Self {
        Self {
            deadline: Self::ENGINE_DEADLINE,
            interval: Self::ENGINE_INTERVAL,
        }
    }

    /// Policy for waiting on a service inside a container.
    pub fn service_default() -> Self {
        Self {
            deadline: Self::SERVICE_DEADLINE,
            interval: Self::SERVICE_INTERVAL,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `probe` until `accept` holds for its result.
    ///
    /// Errors for which `retry_on` returns true are retried like rejected
    /// results; any other error aborts with [`RetryError::Fatal`].
    pub async fn run<T, E, F, Fut, A, R>(
        &self,
        mut probe: F,
        accept: A,
        retry_on: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Fn(&T) -> bool,
        R: Fn(&E) -> bool,
        T: fmt::Debug,
        E: fmt::Display,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let last = match probe().await {
                Ok(value) if accept(&value) => {
                    tracing::debug!(attempts, elapsed = ?started.elapsed(), "Probe accepted");
                    return Ok(value);
                }
                Ok(value) => format!("{value:?}"),
                Err(e) if retry_on(&e) => e.to_string(),
                Err(e) => return Err(RetryError::Fatal(e)),
            };
            tracing::debug!(attempts, last = %last, "Probe not ready");

            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                return Err(self.timeout(elapsed, attempts, last));
            }

            tokio::time::sleep(self.interval.min(self.deadline - elapsed)).await;

            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                return Err(self.timeout(elapsed, attempts, last));
            }
        }
    }

    fn timeout<E>(&self, elapsed: Duration, attempts: u32, last: String) -> RetryError<E> {
        RetryError::Timeout {
            deadline: self.deadline,
            elapsed,
            attempts,
            last,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::engine_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(deadline_ms: u64, interval_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(deadline_ms),
            Duration::from_millis(interval_ms),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_durations() {
        assert!(RetryPolicy::new(Duration::ZERO, Duration::from_secs(1)).is_err());
        assert!(RetryPolicy::new(Duration::from_secs(1), Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepts_immediately_without_sleeping() {
        let started = Instant::now();
        let result: Result<u32, RetryError<String>> = policy(10_000, 1_000)
            .run(|| async { Ok(7) }, |v| *v == 7, |_| true)
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_least_once_with_tiny_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<bool, RetryError<String>> = policy(1, 60_000)
            .run(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(false) }
                },
                |v| *v,
                |_| true,
            )
            .await;
        assert!(matches!(result, Err(RetryError::Timeout { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_within_deadline_plus_interval() {
        let started = Instant::now();
        let result: Result<bool, RetryError<String>> = policy(1_000, 300)
            .run(|| async { Ok(false) }, |v| *v, |_| true)
            .await;
        let elapsed = started.elapsed();

        match result {
            Err(RetryError::Timeout { attempts, last, .. }) => {
                // Polls at 0, 300, 600, 900 ms.
                assert_eq!(attempts, 4);
                assert_eq!(last, "false");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_millis(1_000));
        assert!(elapsed <= Duration::from_millis(1_300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<u32, RetryError<String>> = policy(10_000, 100)
            .run(
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 3 {
                            Err(format!("attempt {n} refused"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| true,
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let started = Instant::now();
        let result: Result<u32, RetryError<String>> = policy(10_000, 100)
            .run(
                || async { Err("image not found".to_string()) },
                |_| true,
                |e| e.contains("refused"),
            )
            .await;
        assert!(matches!(result, Err(RetryError::Fatal(ref e)) if e == "image not found"));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_timeout_converts_to_readiness_timeout() {
        let err: RetryError<String> = RetryError::Timeout {
            deadline: Duration::from_secs(60),
            elapsed: Duration::from_secs(60),
            attempts: 120,
            last: "not running".to_string(),
        };
        let converted = err.into_fixture_error(|e| FixtureError::ProbeFailed { reason: e });
        assert!(matches!(
            converted,
            FixtureError::ReadinessTimeout { attempts: 120, .. }
        ));
    }
}
