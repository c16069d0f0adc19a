// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Retry with backoff and per-dependency circuit breaking for classified failures.
//!
//! This crate provides the two resilience policies shared by the services' outbound calls.
//! Both accept any operation whose error implements [`Classify`][faultline::Classify], and
//! both surface failures as [`ServiceError`][faultline::ServiceError].
//!
//! - [`RetryPolicy`] re-invokes an operation on transient failures, sleeping with exponential
//!   backoff and optional jitter between attempts.
//! - [`CircuitBreaker`] stops calling a dependency after consecutive failures and probes it
//!   again after a recovery timeout. A [`BreakerRegistry`] owns one breaker per dependency.
//!
//! The policies compose by nesting; the breaker sees the outcome of the whole retried call,
//! not of every attempt:
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! use bulwark::{BreakerOptions, BreakerRegistry, RetryPolicy};
//! use faultline::ServiceError;
//!
//! let registry = BreakerRegistry::new(BreakerOptions::default())?;
//! let policy = RetryPolicy::default();
//!
//! let breaker = registry.get_or_create("product-catalog");
//! let price = breaker
//!     .guard(|| policy.execute(|_attempt| async { Ok::<_, ServiceError>(1999_u32) }))
//!     .await?;
//!
//! assert_eq!(price, 1999);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```
//!
//! # Telemetry
//!
//! Failed attempts and breaker state changes are emitted as `tracing` events named
//! `bulwark.retry` and `bulwark.circuit_breaker`. Attach a meter provider through
//! [`Telemetry::with_metrics`] to also count them on the `resilience.event` metric.
//!
//! # Time
//!
//! Delays, cooldowns and timestamps use [`tokio::time`], so tests can drive them with a
//! paused clock.

mod attempt;
mod breaker;
mod error;
pub mod retry;
mod jitter;
pub mod telemetry;

pub use attempt::Attempt;
pub use breaker::{BreakerOptions, BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use error::PolicyError;
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use telemetry::Telemetry;
