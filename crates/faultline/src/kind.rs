// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// The fixed set of failure kinds every dependency call is classified into.
///
/// The kind alone decides whether a failure is retried, whether it counts against a
/// dependency's circuit breaker by default, and which status the caller surfaces.
///
/// | Kind | Retryable | Trips breaker | Status |
/// |------|-----------|---------------|--------|
/// | [`Validation`][Self::Validation] | no | no | 400 |
/// | [`NotFound`][Self::NotFound] | no | no | 404 |
/// | [`Conflict`][Self::Conflict] | no | no | 409 |
/// | [`RateLimited`][Self::RateLimited] | yes | opt-in | 429 |
/// | [`DependencyUnavailable`][Self::DependencyUnavailable] | yes | yes | 503 |
/// | [`CircuitOpen`][Self::CircuitOpen] | no | n/a | 503 |
/// | [`Internal`][Self::Internal] | no | no | 500 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input detected before the call was dispatched.
    Validation,

    /// The requested resource does not exist downstream.
    NotFound,

    /// A write collided with existing state, e.g. a duplicate key.
    Conflict,

    /// The dependency rejected the call because of throughput limits.
    RateLimited,

    /// The dependency could not be reached or answered with a gateway-class failure.
    DependencyUnavailable,

    /// The circuit breaker rejected the call without dispatching it.
    CircuitOpen,

    /// Anything unrecognized. Never retried.
    Internal,
}

/// How loudly a failure kind should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Expected outcome of normal traffic, such as a missing product.
    Info,

    /// Caller mistakes and back-pressure.
    Warning,

    /// Infrastructure or programming failures.
    Error,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Validation,
        Self::NotFound,
        Self::Conflict,
        Self::RateLimited,
        Self::DependencyUnavailable,
        Self::CircuitOpen,
        Self::Internal,
    ];

    /// Returns `true` for the transient kinds a retry policy may retry.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::DependencyUnavailable)
    }

    /// Returns `true` if a circuit breaker counts this kind unless configured otherwise.
    ///
    /// Rate limiting is a healthy dependency protecting itself, so breakers only count it
    /// when asked to.
    #[must_use]
    pub const fn trips_breaker_by_default(self) -> bool {
        matches!(self, Self::DependencyUnavailable)
    }

    /// The HTTP status a service surfaces for this kind.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::DependencyUnavailable | Self::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in error bodies.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            Self::CircuitOpen => "CIRCUIT_BREAKER_OPEN",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Reporting severity.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::NotFound => Severity::Info,
            Self::Validation | Self::Conflict | Self::RateLimited => Severity::Warning,
            Self::DependencyUnavailable | Self::CircuitOpen | Self::Internal => Severity::Error,
        }
    }

    /// Short `snake_case` name, used as a telemetry attribute.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::CircuitOpen => "circuit_open",
            Self::Internal => "internal",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
