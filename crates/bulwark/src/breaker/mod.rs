// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-dependency circuit breaking.
//!
//! A [`CircuitBreaker`] guards calls to one logical dependency and moves between three
//! states:
//!
//! - **Closed**: calls pass. Each counted failure increments a consecutive-failure counter
//!   and a success resets it. When the counter reaches the threshold the breaker opens.
//! - **Open**: calls are rejected with [`ErrorKind::CircuitOpen`] without being invoked,
//!   until the recovery timeout has elapsed since the last failure.
//! - **Half-open**: exactly one trial call is admitted. Success closes the breaker and
//!   resets the counter; a counted failure opens it again.
//!
//! Which failures count is decided by [`BreakerOptions`]. By default only
//! [`ErrorKind::DependencyUnavailable`] does; caller mistakes such as
//! [`ErrorKind::Validation`] or [`ErrorKind::NotFound`] never trip a breaker.

mod engine;
mod registry;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use faultline::{Classify, ErrorKind, ServiceError, detail_keys};
use tokio::time::Instant;

use self::engine::{Engine, EnterResult, Outcome, Ticket, Transition};
use crate::{PolicyError, Telemetry};

pub use registry::BreakerRegistry;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// The state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,

    /// Calls are rejected.
    Open,

    /// A single trial call decides whether to close or reopen.
    HalfOpen,
}

impl CircuitState {
    /// Short `snake_case` name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    pub(crate) fn event_name(self) -> &'static str {
        match self {
            Self::Closed => "circuit_closed",
            Self::Open => "circuit_opened",
            Self::HalfOpen => "circuit_half_opened",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of a [`CircuitBreaker`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bulwark::BreakerOptions;
/// use faultline::ErrorKind;
///
/// let options = BreakerOptions::default()
///     .failure_threshold(3)
///     .recovery_timeout(Duration::from_secs(30))
///     .count(ErrorKind::RateLimited);
///
/// assert!(options.counts(ErrorKind::DependencyUnavailable));
/// assert!(options.counts(ErrorKind::RateLimited));
/// assert!(!options.counts(ErrorKind::NotFound));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerOptions {
    failure_threshold: u32,
    recovery_timeout: Duration,
    counted: BTreeSet<ErrorKind>,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            counted: ErrorKind::ALL.into_iter().filter(|kind| kind.trips_breaker_by_default()).collect(),
        }
    }
}

impl BreakerOptions {
    /// Consecutive counted failures that open the breaker. Must be greater than 0.
    #[must_use]
    pub fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// Time the breaker stays open before admitting a trial call.
    #[must_use]
    pub fn recovery_timeout(mut self, recovery_timeout: Duration) -> Self {
        self.recovery_timeout = recovery_timeout;
        self
    }

    /// Adds `kind` to the kinds that count as failures.
    #[must_use]
    pub fn count(mut self, kind: ErrorKind) -> Self {
        self.counted.insert(kind);
        self
    }

    /// Replaces the kinds that count as failures.
    #[must_use]
    pub fn counted_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.counted = kinds.into_iter().collect();
        self
    }

    /// Whether failures of `kind` move the counter.
    #[must_use]
    pub fn counts(&self, kind: ErrorKind) -> bool {
        // A rejection from a nested breaker says nothing about this dependency's health.
        kind != ErrorKind::CircuitOpen && self.counted.contains(&kind)
    }

    /// The configured threshold.
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// The configured recovery timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ZeroThreshold`] if the failure threshold is zero.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.failure_threshold == 0 {
            return Err(PolicyError::ZeroThreshold);
        }

        Ok(())
    }
}

/// Point-in-time view of a breaker, for health and admin endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Name of the guarded dependency.
    pub name: String,

    /// Current state.
    pub state: CircuitState,

    /// Consecutive counted failures.
    pub consecutive_failures: u32,

    /// When the most recent counted failure happened.
    pub last_failure: Option<Instant>,
}

/// Guards calls to one logical dependency.
///
/// Breakers are usually obtained from a [`BreakerRegistry`], which creates one per
/// dependency name on first use.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// use bulwark::{BreakerOptions, CircuitBreaker};
/// use faultline::{ErrorKind, ServiceError};
///
/// let breaker = CircuitBreaker::new("orders-table", BreakerOptions::default().failure_threshold(1))?;
///
/// let _ = breaker.guard(|| async { Err::<(), _>(ServiceError::unavailable("throttled")) }).await;
///
/// let rejected = breaker.guard(|| async { Ok::<_, ServiceError>(()) }).await.unwrap_err();
/// assert_eq!(rejected.kind(), ErrorKind::CircuitOpen);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: Cow<'static, str>,
    options: BreakerOptions,
    engine: Engine,
    telemetry: Telemetry,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the dependency `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if `options` are invalid.
    pub fn new(name: impl Into<Cow<'static, str>>, options: BreakerOptions) -> Result<Self, PolicyError> {
        options.validate()?;
        Ok(Self::from_validated(name.into(), options, Telemetry::default()))
    }

    pub(crate) fn from_validated(name: Cow<'static, str>, options: BreakerOptions, telemetry: Telemetry) -> Self {
        Self {
            name,
            engine: Engine::new(options.failure_threshold, options.recovery_timeout),
            options,
            telemetry,
        }
    }

    /// Replaces the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Name of the guarded dependency.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's settings.
    #[must_use]
    pub fn options(&self) -> &BreakerOptions {
        &self.options
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.engine.snapshot().state
    }

    /// A consistent view of the breaker's state.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let snapshot = self.engine.snapshot();

        BreakerSnapshot {
            name: self.name.to_string(),
            state: snapshot.state,
            consecutive_failures: snapshot.consecutive_failures,
            last_failure: snapshot.last_failure,
        }
    }

    /// Invokes `operation` if the breaker admits the call and records its outcome.
    ///
    /// If the returned future is dropped before the operation finishes, the call is
    /// recorded as neither success nor failure; a trial call dropped this way frees the
    /// half-open slot for the next caller.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::CircuitOpen`] error carrying `retry_after_ms` when the call is
    /// rejected, or the classified error of the operation.
    pub async fn guard<T, E, F, Fut>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let permit = self.acquire()?;

        match operation().await {
            Ok(value) => {
                permit.complete(Outcome::Success);
                Ok(value)
            }
            Err(error) => {
                let error = error.classify();
                let outcome = if self.options.counts(error.kind()) {
                    Outcome::Failure
                } else {
                    Outcome::Neutral
                };

                permit.complete(outcome);
                Err(error)
            }
        }
    }

    fn acquire(&self) -> Result<CallPermit<'_>, ServiceError> {
        match self.engine.enter(Instant::now()) {
            EnterResult::Accepted { ticket, half_opened } => {
                if half_opened {
                    self.telemetry.state_changed(&self.name, CircuitState::HalfOpen, self.engine.snapshot().consecutive_failures);
                }

                Ok(CallPermit {
                    breaker: self,
                    ticket,
                    completed: false,
                })
            }
            EnterResult::Rejected { retry_after } => {
                self.telemetry.rejected(&self.name, retry_after);
                Err(self.open_error(retry_after))
            }
        }
    }

    fn finish(&self, ticket: Ticket, outcome: Outcome) {
        match self.engine.exit(ticket, outcome, Instant::now()) {
            Transition::Unchanged => {}
            Transition::Opened { consecutive_failures } => {
                self.telemetry.state_changed(&self.name, CircuitState::Open, consecutive_failures);
            }
            Transition::Closed => self.telemetry.state_changed(&self.name, CircuitState::Closed, 0),
        }
    }

    fn open_error(&self, retry_after: Duration) -> ServiceError {
        let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);

        ServiceError::new(ErrorKind::CircuitOpen, format!("circuit breaker for '{}' is open", self.name))
            .with_detail(detail_keys::SERVICE_NAME, self.name.to_string())
            .with_detail(detail_keys::RETRY_AFTER_MS, retry_after_ms)
    }
}

/// An admitted call. Records a neutral outcome if dropped without completing.
#[derive(Debug)]
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    completed: bool,
}

impl CallPermit<'_> {
    fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        self.breaker.finish(self.ticket, outcome);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed && self.ticket.is_probe() {
            self.breaker.finish(self.ticket, Outcome::Neutral);
        }
    }
}
