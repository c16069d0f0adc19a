// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Failure taxonomy for calls to sibling services and managed databases.
//!
//! Every failure observed while calling a dependency is classified into one of a small,
//! fixed set of [`ErrorKind`]s. The kind alone decides whether the failure is retried,
//! whether it counts against the dependency's circuit breaker, and which status and code
//! the calling service surfaces.
//!
//! # Core Types
//!
//! - [`ServiceError`]: the immutable unit of failure reporting.
//! - [`RawFailure`]: the low-level vocabulary adapters translate their errors into.
//! - [`Classify`]: implemented by anything that can become a [`ServiceError`].
//! - [`ErrorBody`]: the user-facing JSON envelope.
//!
//! # Examples
//!
//! ```
//! use faultline::{ErrorBody, ErrorKind, RawFailure, classify, detail_keys};
//! use http::StatusCode;
//!
//! let error = classify(RawFailure::Status(StatusCode::CONFLICT))
//!     .with_detail(detail_keys::SERVICE_NAME, "auth");
//!
//! assert_eq!(error.kind(), ErrorKind::Conflict);
//! assert!(!error.retryable());
//!
//! let body = ErrorBody::from(&error);
//! assert_eq!(body.error.code, "CONFLICT");
//! ```

mod body;
mod classify;
mod error;
mod kind;

pub use body::{ErrorBody, ErrorPayload};
pub use classify::{BoxError, Classify, RawFailure, classify, kind_for_status};
pub use error::{Cause, ServiceError, detail_keys};
pub use kind::{ErrorKind, Severity};
