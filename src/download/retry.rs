//! Retrying execution of fallible async work.
//!
//! [`execute`] runs an operation until it succeeds, the attempt cap is reached,
//! a non-retryable error occurs, or the batch is cancelled. Between attempts it
//! waits for the delay computed by the [`RetryPolicy`]; the wait is a yielding
//! `tokio` sleep, so other in-flight work keeps running.
//!
//! Exhaustion is not an error: the caller gets [`RetryOutcome::Exhausted`] and
//! the [`RetryObserver`] hears about every failed attempt and the final give-up.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use heist_core::download::{NoopObserver, RetryOutcome, RetryPolicy, execute};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[derive(Debug)]
//! # struct Flaky;
//! # impl std::fmt::Display for Flaky {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("flaky") }
//! # }
//! # impl heist_core::download::IsRetryable for Flaky {
//! #     fn is_retryable(&self) -> bool { true }
//! # }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::new(3, Duration::from_millis(10))?;
//! let outcome = execute(
//!     &policy,
//!     |attempt| async move { if attempt < 2 { Err(Flaky) } else { Ok(attempt) } },
//!     &NoopObserver,
//!     &CancellationToken::new(),
//! )
//! .await;
//! assert!(matches!(outcome, RetryOutcome::Succeeded { value: 2, attempts: 2 }));
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Default attempt cap, including the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default multiplier for exponential backoff.
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default cap for exponential backoff delays.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Maximum jitter added to exponential delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classifies errors as worth another attempt or not.
pub trait IsRetryable {
    /// Returns `true` if another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Rejected retry configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryConfigError {
    /// Attempt cap below one.
    #[error("max attempts must be at least 1, got {0}")]
    ZeroAttempts(u32),

    /// Exponential multiplier that would not grow the delay.
    #[error("backoff multiplier must be a finite value >= 1.0, got {0}")]
    InvalidMultiplier(String),
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed,

    /// `min(delay * multiplier^(attempt - 1), max_delay)`, plus up to 500ms of
    /// jitter when enabled.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f32,
        /// Upper bound before jitter.
        max_delay: Duration,
        /// Whether to add random jitter.
        jitter: bool,
    },
}

impl Backoff {
    /// Exponential backoff with the default multiplier (2.0), 32s cap and jitter.
    #[must_use]
    pub fn exponential() -> Self {
        Self::Exponential {
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

/// Attempt cap, delay and backoff shape for [`execute`].
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `delay`: 3 seconds
/// - `backoff`: [`Backoff::Fixed`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Creates a fixed-delay policy.
    ///
    /// # Errors
    ///
    /// Returns [`RetryConfigError::ZeroAttempts`] if `max_attempts` is 0.
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, RetryConfigError> {
        if max_attempts == 0 {
            return Err(RetryConfigError::ZeroAttempts(max_attempts));
        }
        Ok(Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        })
    }

    /// Replaces the backoff shape.
    ///
    /// # Errors
    ///
    /// Returns [`RetryConfigError::InvalidMultiplier`] for an exponential
    /// multiplier below 1.0 or not finite.
    pub fn with_backoff(mut self, backoff: Backoff) -> Result<Self, RetryConfigError> {
        if let Backoff::Exponential { multiplier, .. } = backoff
            && !(multiplier.is_finite() && multiplier >= 1.0)
        {
            return Err(RetryConfigError::InvalidMultiplier(multiplier.to_string()));
        }
        self.backoff = backoff;
        Ok(self)
    }

    /// Maximum number of attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Configured backoff shape.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                multiplier,
                max_delay,
                jitter,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let grown = self.delay.as_secs_f64() * f64::from(multiplier).powi(exponent);
                let capped = grown.min(max_delay.as_secs_f64());
                let base = Duration::try_from_secs_f64(capped).unwrap_or(max_delay);
                if jitter {
                    base + calculate_jitter()
                } else {
                    base
                }
            }
        }
    }
}

/// Random jitter between 0 and [`MAX_JITTER`].
fn calculate_jitter() -> Duration {
    let max_ms = u64::try_from(MAX_JITTER.as_millis()).unwrap_or(u64::MAX);
    let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
    Duration::from_millis(jitter_ms)
}

/// Receives notifications from [`execute`].
///
/// Both methods default to doing nothing, so implementors only override what
/// they need.
pub trait RetryObserver<E: ?Sized> {
    /// Called after every failed attempt. `next_delay` is `None` when no
    /// further attempt will be made.
    fn on_attempt_failure(
        &self,
        _attempt: u32,
        _max_attempts: u32,
        _error: &E,
        _next_delay: Option<Duration>,
    ) {
    }

    /// Called once when all attempts failed.
    fn on_final_failure(&self, _attempts: u32) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<E: ?Sized> RetryObserver<E> for NoopObserver {}

/// Result of [`execute`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Succeeded {
        /// The operation's output.
        value: T,
        /// Attempts used, including the successful one.
        attempts: u32,
    },

    /// Every allowed attempt failed.
    Exhausted {
        /// Attempts made (equal to the policy cap).
        attempts: u32,
        /// Error from the final attempt.
        last_error: E,
    },

    /// A non-retryable error stopped the loop early.
    Aborted {
        /// The attempt that produced the error.
        attempt: u32,
        /// The non-retryable error.
        error: E,
    },

    /// The cancellation token fired.
    Cancelled {
        /// Attempts started before cancellation.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Returns `true` for [`RetryOutcome::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Number of attempts started.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The successful value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Succeeded { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Runs `operation` under `policy`.
///
/// `operation` receives the 1-indexed attempt number. After each failure the
/// observer is told about it; unless the cap is reached the executor then
/// sleeps for [`RetryPolicy::delay_after`]. After the final failure the
/// observer's `on_final_failure` runs and [`RetryOutcome::Exhausted`] is
/// returned. Errors for which [`IsRetryable::is_retryable`] is `false` end the
/// loop at once with [`RetryOutcome::Aborted`].
///
/// `cancel` is checked before each attempt and raced against both the running
/// attempt and the inter-attempt sleep.
#[instrument(level = "debug", skip_all, fields(max_attempts = policy.max_attempts()))]
pub async fn execute<T, E, F, Fut, O>(
    policy: &RetryPolicy,
    mut operation: F,
    observer: &O,
    cancel: &CancellationToken,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + Display,
    O: RetryObserver<E> + ?Sized,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled { attempts: attempt };
        }
        attempt += 1;
        debug!(attempt, "starting attempt");

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: attempt },
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempts = attempt, "succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            observer.on_attempt_failure(attempt, max_attempts, &error, None);
            warn!(attempt, error = %error, "non-retryable error, giving up");
            return RetryOutcome::Aborted { attempt, error };
        }

        let next_delay = (attempt < max_attempts).then(|| policy.delay_after(attempt));
        observer.on_attempt_failure(attempt, max_attempts, &error, next_delay);

        let Some(delay) = next_delay else {
            debug!(attempts = attempt, "max attempts reached");
            observer.on_final_failure(max_attempts);
            return RetryOutcome::Exhausted {
                attempts: attempt,
                last_error: error,
            };
        };

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: attempt },
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Transient => f.write_str("transient error"),
                Self::Fatal => f.write_str("fatal error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Transient)
        }
    }

    #[derive(Default)]
    struct Recorder {
        failures: Mutex<Vec<(u32, Option<Duration>)>>,
        finals: Mutex<Vec<u32>>,
    }

    impl RetryObserver<TestError> for Recorder {
        fn on_attempt_failure(
            &self,
            attempt: u32,
            _max_attempts: u32,
            _error: &TestError,
            next_delay: Option<Duration>,
        ) {
            self.failures.lock().unwrap().push((attempt, next_delay));
        }

        fn on_final_failure(&self, attempts: u32) {
            self.finals.lock().unwrap().push(attempts);
        }
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1)).unwrap()
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), Duration::from_secs(3));
        assert_eq!(policy.backoff(), Backoff::Fixed);
    }

    #[test]
    fn test_retry_policy_rejects_zero_attempts() {
        let err = RetryPolicy::new(0, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, RetryConfigError::ZeroAttempts(0));
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_retry_policy_rejects_shrinking_multiplier() {
        let policy = RetryPolicy::default();
        let result = policy.with_backoff(Backoff::Exponential {
            multiplier: 0.5,
            max_delay: Duration::from_secs(10),
            jitter: false,
        });
        assert!(matches!(result, Err(RetryConfigError::InvalidMultiplier(_))));
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = RetryPolicy::new(5, Duration::from_secs(3)).unwrap();
        assert_eq!(policy.delay_after(1), Duration::from_secs(3));
        assert_eq!(policy.delay_after(4), Duration::from_secs(3));
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_exponential_delay_doubles_without_jitter() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1))
            .unwrap()
            .with_backoff(Backoff::Exponential {
                multiplier: 2.0,
                max_delay: Duration::from_secs(32),
                jitter: false,
            })
            .unwrap();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn test_exponential_delay_respects_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1))
            .unwrap()
            .with_backoff(Backoff::Exponential {
                multiplier: 2.0,
                max_delay: Duration::from_secs(5),
                jitter: false,
            })
            .unwrap();
        // 6th attempt would be 1 * 2^5 = 32s, but capped at 5s
        assert_eq!(policy.delay_after(6), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_jitter_within_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1))
            .unwrap()
            .with_backoff(Backoff::exponential())
            .unwrap();
        for _ in 0..100 {
            let delay = policy.delay_after(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500), "delay {delay:?} exceeds jitter bound");
        }
    }

    // ==================== Execute Tests ====================

    #[tokio::test]
    async fn test_execute_exhaustion_counts() {
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();

        let outcome: RetryOutcome<(), TestError> = execute(
            &quick_policy(3),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            },
            &recorder,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let failures = recorder.failures.lock().unwrap();
        assert_eq!(failures.len(), 3);
        assert_eq!(
            failures.iter().map(|(a, _)| *a).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(failures[2].1.is_none(), "last attempt announces no retry");
        assert_eq!(*recorder.finals.lock().unwrap(), vec![3]);
        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 3,
                last_error: TestError::Transient
            }
        ));
    }

    #[tokio::test]
    async fn test_execute_short_circuits_on_success() {
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();

        let outcome = execute(
            &quick_policy(3),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(TestError::Transient)
                    } else {
                        Ok("done")
                    }
                }
            },
            &recorder,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.failures.lock().unwrap().len(), 2);
        assert!(recorder.finals.lock().unwrap().is_empty());
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_value(), Some("done"));
    }

    #[tokio::test]
    async fn test_execute_first_attempt_success_skips_observer() {
        let recorder = Recorder::default();
        let outcome = execute(
            &quick_policy(3),
            |_| async { Ok::<_, TestError>(7) },
            &recorder,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Succeeded { value: 7, attempts: 1 }));
        assert!(recorder.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_single_attempt_policy() {
        let recorder = Recorder::default();
        let outcome: RetryOutcome<(), _> = execute(
            &quick_policy(1),
            |_| async { Err(TestError::Transient) },
            &recorder,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(*recorder.failures.lock().unwrap(), vec![(1, None)]);
        assert_eq!(*recorder.finals.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_execute_non_retryable_aborts_without_final_failure() {
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();

        let outcome: RetryOutcome<(), _> = execute(
            &quick_policy(3),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            },
            &recorder,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome,
            RetryOutcome::Aborted {
                attempt: 1,
                error: TestError::Fatal
            }
        ));
        assert_eq!(recorder.failures.lock().unwrap().len(), 1);
        assert!(recorder.finals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_cancelled_before_start_runs_nothing() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome: RetryOutcome<(), TestError> = execute(
            &quick_policy(3),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            &NoopObserver,
            &cancel,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_cancel_interrupts_retry_delay() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(3600)).unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome: RetryOutcome<(), _> = execute(
            &policy,
            |_| async { Err(TestError::Transient) },
            &NoopObserver,
            &cancel,
        )
        .await;

        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_waits_fixed_delay_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(3)).unwrap();
        let started = tokio::time::Instant::now();

        let outcome: RetryOutcome<(), _> = execute(
            &policy,
            |_| async { Err(TestError::Transient) },
            &NoopObserver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.attempts(), 3);
        // Two waits between three attempts, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "waited only {elapsed:?}");
        assert!(elapsed < Duration::from_secs(9), "waited after last attempt: {elapsed:?}");
    }

    #[test]
    fn test_default_max_attempts_constant() {
        assert_eq!(DEFAULT_MAX_ATTEMPTS, 3);
    }
}
