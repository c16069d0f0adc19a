// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde_json::Value;

use crate::{ErrorKind, Severity};

/// Shared, type-erased lower-level error kept as the cause of a [`ServiceError`].
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Well-known keys of [`ServiceError::details`].
pub mod detail_keys {
    /// Logical name of the dependency the call was made to.
    pub const SERVICE_NAME: &str = "service_name";

    /// Correlation identifier of the inbound request that issued the call.
    pub const CORRELATION_ID: &str = "correlation_id";

    /// Number of attempts made before the error was surfaced.
    pub const ATTEMPT_COUNT: &str = "attempt_count";

    /// Remaining breaker cooldown, in milliseconds.
    pub const RETRY_AFTER_MS: &str = "retry_after_ms";

    /// HTTP status returned by the dependency.
    pub const STATUS_CODE: &str = "status_code";
}

/// The unit of failure reporting for dependency calls.
///
/// A `ServiceError` is created at the point a failure is classified and is never changed
/// afterwards. Layers that want to add context, such as the attempt count or the
/// correlation identifier, use the consuming [`with_detail`][Self::with_detail] method,
/// which yields a new value.
///
/// The wrapped cause is available through [`Error::source`][StdError::source] for logging
/// but is never part of the user-facing [`ErrorBody`][crate::ErrorBody].
///
/// # Examples
///
/// ```
/// use faultline::{ErrorKind, ServiceError, detail_keys};
///
/// let error = ServiceError::new(ErrorKind::DependencyUnavailable, "product catalog timed out")
///     .with_detail(detail_keys::ATTEMPT_COUNT, 3);
///
/// assert!(error.retryable());
/// assert_eq!(error.detail(detail_keys::ATTEMPT_COUNT), Some(&3.into()));
/// ```
#[derive(Clone)]
pub struct ServiceError {
    kind: ErrorKind,
    message: Cow<'static, str>,
    details: BTreeMap<String, Value>,
    caused_by: Option<Cause>,
}

impl ServiceError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
            caused_by: None,
        }
    }

    /// Shorthand for a [`ErrorKind::Validation`] error.
    #[must_use]
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a [`ErrorKind::NotFound`] error.
    #[must_use]
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for a [`ErrorKind::DependencyUnavailable`] error.
    #[must_use]
    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::DependencyUnavailable, message)
    }

    /// Shorthand for a [`ErrorKind::Internal`] error.
    #[must_use]
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Returns a copy with `key` set to `value` in the details.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Returns a copy that wraps `cause` as the lower-level error.
    #[must_use]
    pub fn caused_by(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.caused_by = Some(Arc::new(cause));
        self
    }

    /// Returns a copy that wraps an already shared cause.
    #[must_use]
    pub fn caused_by_shared(mut self, cause: Cause) -> Self {
        self.caused_by = Some(cause);
        self
    }

    /// The classified kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether a retry policy may retry this error. Derived from the kind.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Reporting severity. Derived from the kind.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Structured context intended for logging and error bodies.
    #[must_use]
    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    /// Looks up a single detail.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    /// The wrapped lower-level error, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Cause> {
        self.caused_by.as_ref()
    }
}

impl Debug for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("details", &self.details)
            .field("caused_by", &self.caused_by.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for ServiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.caused_by.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl PartialEq for ServiceError {
    // Causes are opaque; two errors are equal when everything callers can observe matches.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message && self.details == other.details
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn with_detail_returns_enriched_copy() {
        let original = ServiceError::not_found("product 42 not found");
        let enriched = original.clone().with_detail(detail_keys::SERVICE_NAME, "product-catalog");

        assert!(original.details().is_empty());
        assert_eq!(
            enriched.detail(detail_keys::SERVICE_NAME),
            Some(&Value::from("product-catalog"))
        );
        assert_ne!(original, enriched);
    }

    #[test]
    fn source_exposes_cause() {
        let error = ServiceError::unavailable("database unreachable")
            .caused_by(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));

        let source = error.source().unwrap();
        assert_eq!(source.to_string(), "refused");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let error = ServiceError::validation("quantity must be positive");
        assert_eq!(error.to_string(), "validation: quantity must be positive");
    }

    #[test]
    fn retryable_follows_kind() {
        assert!(ServiceError::unavailable("x").retryable());
        assert!(!ServiceError::internal("x").retryable());
        assert!(!ServiceError::new(ErrorKind::CircuitOpen, "x").retryable());
    }
}
