// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and metrics emitted by retry policies and circuit breakers.
//!
//! Every event is written as a `tracing` event. When a [`MeterProvider`] is supplied, each
//! event also increments the `resilience.event` counter, with the keys below as attributes.
//!
//! Names follow the [OpenTelemetry naming guidelines](https://opentelemetry.io/docs/specs/semconv/general/naming/#general-naming-considerations).

use std::time::Duration;

use faultline::ServiceError;
use opentelemetry::metrics::{Counter, MeterProvider};
use opentelemetry::{InstrumentationScope, KeyValue};

use crate::Attempt;
use crate::breaker::CircuitState;

const EVENT_COUNTER: &str = "resilience.event";

/// Key used to annotate the logical dependency a resilience event belongs to.
///
/// Examples: `auth`, `product-catalog`, `orders-table`.
pub const DEPENDENCY_NAME: &str = "resilience.dependency.name";

/// Key used to annotate the specific resilience event being emitted.
///
/// Examples: `retry`, `circuit_opened`, `circuit_rejected`.
pub const EVENT_NAME: &str = "resilience.event.name";

/// Key used to annotate the 0-based attempt index of a retry event.
pub const ATTEMPT_INDEX: &str = "resilience.attempt.index";

/// Key used to annotate the classified kind of the failure behind an event.
pub const ERROR_KIND: &str = "resilience.error.kind";

pub(crate) const RETRY_EVENT: &str = "retry";
pub(crate) const RETRY_EXHAUSTED_EVENT: &str = "retry_exhausted";
pub(crate) const CIRCUIT_REJECTED_EVENT: &str = "circuit_rejected";

/// Sink for resilience events.
///
/// Cheap to clone. The default instance writes logs and records no metrics.
///
/// # Examples
///
/// ```
/// use bulwark::Telemetry;
/// use opentelemetry_sdk::metrics::SdkMeterProvider;
///
/// let provider = SdkMeterProvider::default();
/// let telemetry = Telemetry::new().with_metrics(&provider);
/// assert!(telemetry.metrics_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct Telemetry {
    event_reporter: Option<Counter<u64>>,
    logs_enabled: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Creates a sink that writes logs only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            event_reporter: None,
            logs_enabled: true,
        }
    }

    /// Creates a sink that emits nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            event_reporter: None,
            logs_enabled: false,
        }
    }

    /// Additionally records every event on a `resilience.event` counter of `provider`.
    #[must_use]
    pub fn with_metrics(mut self, provider: &dyn MeterProvider) -> Self {
        self.event_reporter = Some(event_counter(provider));
        self
    }

    /// Whether a metrics counter is attached.
    #[must_use]
    pub fn metrics_enabled(&self) -> bool {
        self.event_reporter.is_some()
    }

    pub(crate) fn attempt_failed(&self, dependency: &str, attempt: Attempt, error: &ServiceError, retry_delay: Option<Duration>) {
        let event = if retry_delay.is_some() { RETRY_EVENT } else { RETRY_EXHAUSTED_EVENT };

        if self.logs_enabled {
            tracing::event!(
                name: "bulwark.retry",
                tracing::Level::WARN,
                dependency.name = dependency,
                resilience.event.name = event,
                resilience.attempt.index = attempt.index(),
                resilience.attempt.is_last = attempt.is_last(),
                resilience.retry.delay = retry_delay.unwrap_or_default().as_secs_f32(),
                resilience.error.kind = %error.kind(),
                error.message = error.message(),
            );
        }

        self.report_metrics(&[
            KeyValue::new(DEPENDENCY_NAME, dependency.to_owned()),
            KeyValue::new(EVENT_NAME, event),
            KeyValue::new(ATTEMPT_INDEX, i64::from(attempt.index())),
            KeyValue::new(ERROR_KIND, error.kind().as_str()),
        ]);
    }

    pub(crate) fn state_changed(&self, dependency: &str, state: CircuitState, consecutive_failures: u32) {
        let event = state.event_name();

        if self.logs_enabled {
            match state {
                CircuitState::Open => tracing::event!(
                    name: "bulwark.circuit_breaker",
                    tracing::Level::ERROR,
                    dependency.name = dependency,
                    resilience.event.name = event,
                    resilience.circuit_breaker.state = %state,
                    resilience.circuit_breaker.consecutive_failures = consecutive_failures,
                ),
                CircuitState::HalfOpen | CircuitState::Closed => tracing::event!(
                    name: "bulwark.circuit_breaker",
                    tracing::Level::INFO,
                    dependency.name = dependency,
                    resilience.event.name = event,
                    resilience.circuit_breaker.state = %state,
                    resilience.circuit_breaker.consecutive_failures = consecutive_failures,
                ),
            }
        }

        self.report_metrics(&[
            KeyValue::new(DEPENDENCY_NAME, dependency.to_owned()),
            KeyValue::new(EVENT_NAME, event),
        ]);
    }

    pub(crate) fn rejected(&self, dependency: &str, retry_after: Duration) {
        if self.logs_enabled {
            tracing::event!(
                name: "bulwark.circuit_breaker",
                tracing::Level::WARN,
                dependency.name = dependency,
                resilience.event.name = CIRCUIT_REJECTED_EVENT,
                resilience.circuit_breaker.retry_after = retry_after.as_secs_f32(),
            );
        }

        self.report_metrics(&[
            KeyValue::new(DEPENDENCY_NAME, dependency.to_owned()),
            KeyValue::new(EVENT_NAME, CIRCUIT_REJECTED_EVENT),
        ]);
    }

    fn report_metrics(&self, attributes: &[KeyValue]) {
        if let Some(reporter) = &self.event_reporter {
            reporter.add(1, attributes);
        }
    }
}

/// Counter of retries, breaker transitions and rejections, scoped to this crate.
fn event_counter(provider: &dyn MeterProvider) -> Counter<u64> {
    let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .build();

    provider
        .meter_with_scope(scope)
        .u64_counter(EVENT_COUNTER)
        .with_description("Retries, circuit breaker transitions and rejected calls.")
        .with_unit("{event}")
        .build()
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use faultline::ErrorKind;
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    use super::*;

    fn in_memory_provider() -> (InMemoryMetricExporter, SdkMeterProvider) {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build();
        (exporter, provider)
    }

    #[test]
    #[cfg(not(miri))]
    fn counter_is_scoped_to_the_crate() {
        let (exporter, provider) = in_memory_provider();

        event_counter(&provider).add(1, &[]);

        provider.force_flush().unwrap();

        let metrics = exporter.get_finished_metrics().unwrap();
        let str = format!("{metrics:?}");

        assert!(str.contains(EVENT_COUNTER));
        assert!(str.contains("{event}"));
        assert!(str.contains("bulwark"));
        assert!(str.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    #[cfg(not(miri))]
    fn events_carry_dependency_and_event_name() {
        let (exporter, provider) = in_memory_provider();
        let telemetry = Telemetry::disabled().with_metrics(&provider);
        let error = ServiceError::new(ErrorKind::DependencyUnavailable, "down");

        telemetry.attempt_failed("product-catalog", Attempt::first(3), &error, Some(Duration::from_millis(100)));
        telemetry.state_changed("product-catalog", CircuitState::Open, 3);
        telemetry.rejected("product-catalog", Duration::from_secs(1));

        provider.force_flush().unwrap();

        let str = format!("{:?}", exporter.get_finished_metrics().unwrap());
        assert!(str.contains("product-catalog"));
        assert!(str.contains(RETRY_EVENT));
        assert!(str.contains("circuit_opened"));
        assert!(str.contains(CIRCUIT_REJECTED_EVENT));
        assert!(str.contains("dependency_unavailable"));
    }

    #[test]
    fn default_has_no_metrics() {
        assert!(!Telemetry::default().metrics_enabled());
        assert!(!Telemetry::disabled().metrics_enabled());
    }
}
