//! Bounded retry with backoff.
//!
//! An operation is attempted sequentially until it succeeds, fails with an
//! error that is not worth retrying, or runs out of attempts. The loop never
//! raises: the final result and the number of attempts made are returned as
//! a [`RetryOutcome`] so callers can turn them into history and progress data.

use core_async::time::{sleep, Duration};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Upper bound of the random extra delay, as a fraction of the curve.
const MAX_JITTER: f64 = 0.25;

/// Shape of the delay between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffCurve {
    /// Same delay before every retry
    Fixed,
    /// `initial * attempt`
    Linear,
    /// `initial * multiplier^(attempt - 1)`
    Exponential { multiplier: f64 },
}

impl Default for BackoffCurve {
    fn default() -> Self {
        Self::Exponential {
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffCurve,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Adds up to 25% random delay on top of the curve.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            backoff: BackoffCurve::default(),
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            ..Self::default()
        }
    }

    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            backoff: BackoffCurve::Fixed,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffCurve) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::Configuration(
                "Retry policy maxAttempts must be at least 1".to_string(),
            ));
        }
        if let BackoffCurve::Exponential { multiplier } = self.backoff {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(SyncError::Configuration(format!(
                    "Retry policy multiplier must be a finite number >= 1, got {}",
                    multiplier
                )));
            }
        }
        Ok(())
    }

    /// Delay to wait after the given (1-based) attempt failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }

        let initial = self.initial_delay_ms as f64;
        let base = match self.backoff {
            BackoffCurve::Fixed => initial,
            BackoffCurve::Linear => initial * attempt as f64,
            BackoffCurve::Exponential { multiplier } => {
                initial * multiplier.powi(attempt.saturating_sub(1) as i32)
            }
        };

        let capped = if self.max_delay_ms > 0 {
            base.min(self.max_delay_ms as f64)
        } else {
            base
        };

        let delay = if self.jitter {
            capped + capped * rand::thread_rng().gen_range(0.0..MAX_JITTER)
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Always at least 1.
    pub attempts_made: u32,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts_made.saturating_sub(1)
    }

    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// `operation` receives the 1-based attempt number. `label` only feeds the
/// log output.
pub async fn execute_with_attempt<T, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    label: &str,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}/{}", label, attempt, max_attempts);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts_made: attempt,
                };
            }
            Err(error) if !error.is_retryable() => {
                warn!(
                    error_kind = %error.kind(),
                    "{} failed with a non-retryable error: {}",
                    label,
                    error
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts_made: attempt,
                };
            }
            Err(error) if attempt >= max_attempts => {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    label, attempt, error
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts_made: attempt,
                };
            }
            Err(error) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    "{} attempt {}/{} failed, retrying: {}",
                    label,
                    attempt,
                    max_attempts,
                    error
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, 1)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1_000);
        assert_eq!(policy.backoff, BackoffCurve::Exponential { multiplier: 2.0 });
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(10, 100);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new(20, 1_000).with_max_delay_ms(5_000);
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_fixed_and_linear_curves() {
        let fixed = RetryPolicy::new(5, 250).with_backoff(BackoffCurve::Fixed);
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(fixed.delay_for_attempt(4), Duration::from_millis(250));

        let linear = RetryPolicy::new(5, 250).with_backoff(BackoffCurve::Linear);
        assert_eq!(linear.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(750));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::new(5, 1_000).with_jitter(true);
        for attempt in 1..4 {
            let base = RetryPolicy::new(5, 1_000).delay_for_attempt(attempt);
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 4);
        }
    }

    #[test]
    fn test_jitter_differs_between_draws() {
        let policy = RetryPolicy::new(5, 10_000).with_jitter(true);
        let delays: std::collections::HashSet<Duration> =
            (0..32).map(|_| policy.delay_for_attempt(1)).collect();
        assert!(delays.len() > 1, "jitter produced a single value: {:?}", delays);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        assert!(RetryPolicy::new(0, 10).validate().is_err());
        assert!(RetryPolicy::new(1, 0).validate().is_ok());
        assert!(RetryPolicy::new(2, 10)
            .with_backoff(BackoffCurve::Exponential { multiplier: 0.5 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_policy_json_uses_tagged_curve() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"maxAttempts":4,"initialDelayMs":50,"backoff":{"kind":"linear"}}"#,
        )
        .unwrap();
        assert_eq!(policy.backoff, BackoffCurve::Linear);
        assert_eq!(policy.max_delay_ms, DEFAULT_MAX_DELAY_MS);
    }

    #[core_async::test]
    async fn test_first_attempt_success() {
        let outcome =
            execute_with_attempt(|_| async { Ok::<_, SyncError>(7) }, &quick(3), "op").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts_made, 1);
        assert_eq!(outcome.retries(), 0);
        assert_eq!(outcome.result.unwrap(), 7);
    }

    #[core_async::test]
    async fn test_succeeds_on_later_attempt() {
        let outcome = execute_with_attempt(
            |attempt| async move {
                if attempt < 3 {
                    Err(SyncError::Provider("flaky".into()))
                } else {
                    Ok(attempt)
                }
            },
            &quick(5),
            "op",
        )
        .await;

        assert_eq!(outcome.attempts_made, 3);
        assert_eq!(outcome.result.unwrap(), 3);
    }

    #[core_async::test]
    async fn test_exhaustion_reports_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome: RetryOutcome<()> = execute_with_attempt(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Provider("down".into())) }
            },
            &quick(3),
            "op",
        )
        .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts_made, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.error_message().as_deref(), Some("down"));
    }

    #[core_async::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome: RetryOutcome<()> = execute_with_attempt(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Configuration("Missing required input: collection".into())) }
            },
            &quick(5),
            "op",
        )
        .await;

        assert_eq!(outcome.attempts_made, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome.result, Err(SyncError::Configuration(_))));
    }

    #[core_async::test]
    async fn test_zero_attempts_still_runs_once() {
        let outcome: RetryOutcome<()> = execute_with_attempt(
            |_| async { Err(SyncError::Provider("x".into())) },
            &RetryPolicy::new(0, 0),
            "op",
        )
        .await;
        assert_eq!(outcome.attempts_made, 1);
    }
}
