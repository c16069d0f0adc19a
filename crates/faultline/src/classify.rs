// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::sync::Arc;

use http::StatusCode;

use crate::{ErrorKind, ServiceError, detail_keys};

/// Boxed lower-level error carried by some [`RawFailure`] variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Low-level failures observed while talking to a dependency, before classification.
///
/// Transport adapters and database drivers translate their own errors into these variants
/// and let [`classify`] decide the [`ErrorKind`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RawFailure {
    /// The attempt did not complete within its time budget.
    #[error("operation timed out")]
    Timeout,

    /// The remote host refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// The connection could not be established or broke mid-flight.
    #[error("connection failed")]
    Connection(#[source] BoxError),

    /// The dependency answered with a non-success HTTP status.
    #[error("dependency responded with status {0}")]
    Status(StatusCode),

    /// A write violated a uniqueness constraint.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The addressed key or record does not exist.
    #[error("missing: {0}")]
    Missing(String),

    /// The dependency throttled the call.
    #[error("throughput exceeded")]
    ThroughputExceeded,

    /// The input was rejected before the call was dispatched.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The dependency answered with something that could not be understood.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Anything else.
    #[error(transparent)]
    Other(BoxError),
}

/// Values that can be turned into a [`ServiceError`].
///
/// Retry policies and circuit breakers accept any operation whose error type implements this
/// trait, so callers can keep their native error types at the call site.
pub trait Classify {
    /// Converts `self` into a classified error.
    fn classify(self) -> ServiceError;
}

/// Classifies a raw failure into a [`ServiceError`].
///
/// The function is pure: the same input always yields the same kind.
///
/// # Examples
///
/// ```
/// use faultline::{ErrorKind, RawFailure, classify};
/// use http::StatusCode;
///
/// let error = classify(RawFailure::Status(StatusCode::BAD_GATEWAY));
/// assert_eq!(error.kind(), ErrorKind::DependencyUnavailable);
/// assert!(error.retryable());
/// ```
pub fn classify(raw: impl Classify) -> ServiceError {
    raw.classify()
}

/// Maps a non-success HTTP status to an [`ErrorKind`].
#[must_use]
pub fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::Validation,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::CONFLICT => ErrorKind::Conflict,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ErrorKind::DependencyUnavailable
        }
        _ => ErrorKind::Internal,
    }
}

impl Classify for RawFailure {
    fn classify(self) -> ServiceError {
        let kind = match &self {
            Self::Timeout | Self::ConnectionRefused | Self::Connection(_) => ErrorKind::DependencyUnavailable,
            Self::Status(status) => kind_for_status(*status),
            Self::UniqueViolation(_) => ErrorKind::Conflict,
            Self::Missing(_) => ErrorKind::NotFound,
            Self::ThroughputExceeded => ErrorKind::RateLimited,
            Self::InvalidInput(_) => ErrorKind::Validation,
            Self::MalformedResponse(_) | Self::Other(_) => ErrorKind::Internal,
        };

        let mut error = ServiceError::new(kind, self.to_string());
        if let Self::Status(status) = &self {
            error = error.with_detail(detail_keys::STATUS_CODE, status.as_u16());
        }

        error.caused_by_shared(Arc::new(self))
    }
}

impl Classify for ServiceError {
    fn classify(self) -> ServiceError {
        self
    }
}

impl Classify for io::Error {
    fn classify(self) -> ServiceError {
        let kind = match self.kind() {
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable => ErrorKind::DependencyUnavailable,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ErrorKind::Conflict,
            io::ErrorKind::InvalidInput => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        };

        ServiceError::new(kind, self.to_string()).caused_by(self)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::timeout(RawFailure::Timeout, ErrorKind::DependencyUnavailable)]
    #[case::refused(RawFailure::ConnectionRefused, ErrorKind::DependencyUnavailable)]
    #[case::reset(RawFailure::Connection("reset by peer".into()), ErrorKind::DependencyUnavailable)]
    #[case::bad_gateway(RawFailure::Status(StatusCode::BAD_GATEWAY), ErrorKind::DependencyUnavailable)]
    #[case::unavailable(RawFailure::Status(StatusCode::SERVICE_UNAVAILABLE), ErrorKind::DependencyUnavailable)]
    #[case::gateway_timeout(RawFailure::Status(StatusCode::GATEWAY_TIMEOUT), ErrorKind::DependencyUnavailable)]
    #[case::conflict(RawFailure::Status(StatusCode::CONFLICT), ErrorKind::Conflict)]
    #[case::unique(RawFailure::UniqueViolation("users.email".into()), ErrorKind::Conflict)]
    #[case::not_found(RawFailure::Status(StatusCode::NOT_FOUND), ErrorKind::NotFound)]
    #[case::missing(RawFailure::Missing("product 17".into()), ErrorKind::NotFound)]
    #[case::too_many(RawFailure::Status(StatusCode::TOO_MANY_REQUESTS), ErrorKind::RateLimited)]
    #[case::throughput(RawFailure::ThroughputExceeded, ErrorKind::RateLimited)]
    #[case::bad_request(RawFailure::Status(StatusCode::BAD_REQUEST), ErrorKind::Validation)]
    #[case::unprocessable(RawFailure::Status(StatusCode::UNPROCESSABLE_ENTITY), ErrorKind::Validation)]
    #[case::invalid(RawFailure::InvalidInput("quantity".into()), ErrorKind::Validation)]
    #[case::server_error(RawFailure::Status(StatusCode::INTERNAL_SERVER_ERROR), ErrorKind::Internal)]
    #[case::not_implemented(RawFailure::Status(StatusCode::NOT_IMPLEMENTED), ErrorKind::Internal)]
    #[case::malformed(RawFailure::MalformedResponse("eof".into()), ErrorKind::Internal)]
    #[case::other(RawFailure::Other("boom".into()), ErrorKind::Internal)]
    fn raw_failure_kind(#[case] raw: RawFailure, #[case] expected: ErrorKind) {
        let error = classify(raw);

        assert_eq!(error.kind(), expected);
        assert_eq!(error.retryable(), expected.is_retryable());
    }

    #[rstest]
    #[case(io::ErrorKind::TimedOut, ErrorKind::DependencyUnavailable)]
    #[case(io::ErrorKind::ConnectionRefused, ErrorKind::DependencyUnavailable)]
    #[case(io::ErrorKind::ConnectionReset, ErrorKind::DependencyUnavailable)]
    #[case(io::ErrorKind::NotFound, ErrorKind::NotFound)]
    #[case(io::ErrorKind::AlreadyExists, ErrorKind::Conflict)]
    #[case(io::ErrorKind::InvalidInput, ErrorKind::Validation)]
    #[case(io::ErrorKind::InvalidData, ErrorKind::Internal)]
    #[case(io::ErrorKind::PermissionDenied, ErrorKind::Internal)]
    fn io_error_kind(#[case] io_kind: io::ErrorKind, #[case] expected: ErrorKind) {
        let error = classify(io::Error::new(io_kind, "io"));
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn status_is_recorded_in_details() {
        let error = classify(RawFailure::Status(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(error.detail(detail_keys::STATUS_CODE), Some(&503.into()));
    }

    #[test]
    fn raw_failure_is_kept_as_cause() {
        let error = classify(RawFailure::Connection("reset by peer".into()));

        let cause = error.source().unwrap();
        assert_eq!(cause.to_string(), "connection failed");
        assert_eq!(cause.source().unwrap().to_string(), "reset by peer");
    }

    #[test]
    fn service_error_passes_through() {
        let original = ServiceError::not_found("order 9").with_detail("order_id", 9);
        assert_eq!(classify(original.clone()), original);
    }
}
