// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retrying transient failures with exponential backoff.
//!
//! A [`RetryPolicy`] re-invokes an operation while it fails with a retryable
//! [`ErrorKind`][faultline::ErrorKind] and attempts remain. Only
//! [`DependencyUnavailable`][faultline::ErrorKind::DependencyUnavailable] and
//! [`RateLimited`][faultline::ErrorKind::RateLimited] are retried; any other failure is
//! surfaced after a single invocation.
//!
//! Delays grow as `min(max_delay, base_delay * backoff_multiplier^(n - 1))` after the n-th
//! failure. With jitter enabled, each delay is scaled by a random factor in `[0.5, 1.0)` so
//! that callers failing together do not retry together.

mod backoff;

use std::future::Future;
use std::time::Duration;

use faultline::{Classify, ServiceError, detail_keys};

use crate::jitter::JitterSource;
use crate::{Attempt, PolicyError, Telemetry};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_USE_JITTER: bool = true;

/// Name reported for calls executed without a dependency name.
const UNNAMED: &str = "unnamed";

/// Validated retry settings.
///
/// Construct one through [`RetryPolicy::builder`]; the builder rejects settings that would
/// break the backoff invariants instead of panicking.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// use std::time::Duration;
///
/// use bulwark::RetryPolicy;
/// use faultline::{ErrorKind, ServiceError};
///
/// let policy = RetryPolicy::builder()
///     .max_attempts(3)
///     .base_delay(Duration::from_millis(1))
///     .jitter(false)
///     .build()?;
///
/// let result: Result<u32, ServiceError> = policy
///     .execute(|attempt| async move {
///         if attempt.number() < 3 {
///             Err(ServiceError::unavailable("inventory table throttled"))
///         } else {
///             Ok(42)
///         }
///     })
///     .await;
///
/// assert_eq!(result?, 42);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    jitter_source: JitterSource,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_USE_JITTER,
            jitter_source: JitterSource::default(),
        }
    }
}

impl RetryPolicy {
    /// Starts building a policy from the defaults: 3 attempts, 100 ms base delay, 2 s cap,
    /// multiplier 2.0, jitter on.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder { policy: Self::default() }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Total number of invocations allowed, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound for any single delay.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor between consecutive delays.
    #[must_use]
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Whether delays are randomized.
    #[must_use]
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// The backoff sequence before jitter: the delay after the first failure, then after
    /// the second, and so on. Non-decreasing and capped at [`max_delay`][Self::max_delay].
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        backoff::Delays::new(self.base_delay, self.max_delay, self.backoff_multiplier)
    }

    /// Runs `operation` under this policy, logging failed attempts.
    ///
    /// See [`execute_observed`][Self::execute_observed].
    ///
    /// # Errors
    ///
    /// Returns the classified error of the last attempt, with `attempt_count` in its details.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.execute_observed(UNNAMED, &Telemetry::default(), operation).await
    }

    /// Runs `operation` under this policy, reporting each failed attempt of `dependency`
    /// to `telemetry`.
    ///
    /// The operation is invoked once per attempt and must be safe to invoke again. Attempts
    /// run strictly one after another; the delay between them suspends the task without
    /// blocking the thread.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the last attempt, with `attempt_count` in its details,
    /// when the error is not retryable or the attempts are exhausted.
    pub async fn execute_observed<T, E, F, Fut>(&self, dependency: &str, telemetry: &Telemetry, mut operation: F) -> Result<T, ServiceError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let mut attempt = Attempt::first(self.max_attempts);
        let mut delays = self.delays();

        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error.classify(),
            };

            let next_attempt = if error.retryable() {
                attempt.next(self.max_attempts)
            } else {
                None
            };

            let Some(next_attempt) = next_attempt else {
                telemetry.attempt_failed(dependency, attempt, &error, None);
                return Err(error.with_detail(detail_keys::ATTEMPT_COUNT, attempt.number()));
            };

            let delay = self.jittered(delays.next().unwrap_or(self.max_delay));
            telemetry.attempt_failed(dependency, attempt, &error, Some(delay));

            tokio::time::sleep(delay).await;
            attempt = next_attempt;
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            backoff::apply_jitter(delay, self.jitter_source)
        } else {
            delay
        }
    }

    #[cfg(test)]
    pub(crate) fn with_jitter_source(mut self, source: JitterSource) -> Self {
        self.jitter_source = source;
        self
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Total number of invocations allowed, including the first. Must be at least 1.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Delay before the first retry. Must not exceed the maximum delay.
    #[must_use]
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.policy.base_delay = base_delay;
        self
    }

    /// Upper bound for any single delay.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.policy.max_delay = max_delay;
        self
    }

    /// Growth factor between consecutive delays. Must be at least 1.0.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Validates the settings and builds the policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if `max_attempts` is zero, the multiplier is below 1.0 or not
    /// finite, or the base delay exceeds the maximum delay.
    pub fn build(self) -> Result<RetryPolicy, PolicyError> {
        let policy = self.policy;

        if policy.max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }

        if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(policy.backoff_multiplier));
        }

        if policy.base_delay > policy.max_delay {
            return Err(PolicyError::BaseExceedsMax {
                base: policy.base_delay,
                max: policy.max_delay,
            });
        }

        Ok(policy)
    }
}
