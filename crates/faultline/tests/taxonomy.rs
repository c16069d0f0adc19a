// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Classification of raw failures and their user-facing bodies.

use std::io;

use faultline::{ErrorBody, ErrorKind, RawFailure, ServiceError, classify, detail_keys};
use http::StatusCode;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

#[rstest]
#[case(ErrorKind::Validation, false, 400, "VALIDATION_ERROR")]
#[case(ErrorKind::NotFound, false, 404, "NOT_FOUND")]
#[case(ErrorKind::Conflict, false, 409, "CONFLICT")]
#[case(ErrorKind::RateLimited, true, 429, "RATE_LIMITED")]
#[case(ErrorKind::DependencyUnavailable, true, 503, "DEPENDENCY_UNAVAILABLE")]
#[case(ErrorKind::CircuitOpen, false, 503, "CIRCUIT_BREAKER_OPEN")]
#[case(ErrorKind::Internal, false, 500, "INTERNAL_ERROR")]
fn taxonomy_table(#[case] kind: ErrorKind, #[case] retryable: bool, #[case] status: u16, #[case] code: &str) {
    let error = ServiceError::new(kind, "x");

    assert_eq!(error.retryable(), retryable);
    assert_eq!(kind.status().as_u16(), status);
    assert_eq!(kind.code(), code);
}

#[test]
fn unique_violation_becomes_conflict_body() {
    let error = classify(RawFailure::UniqueViolation("orders_pkey".to_owned()))
        .with_detail(detail_keys::SERVICE_NAME, "order-processing")
        .with_detail(detail_keys::CORRELATION_ID, "req-9");
    let timestamp = "2025-01-02T03:04:05Z".parse().unwrap();

    let body = serde_json::to_value(ErrorBody::at(&error, Some("req-9".to_owned()), timestamp)).unwrap();

    assert_eq!(
        body,
        json!({
            "error": {
                "message": error.message(),
                "code": "CONFLICT",
                "details": { "correlation_id": "req-9", "service_name": "order-processing" },
                "timestamp": "2025-01-02T03:04:05Z",
                "request_id": "req-9",
            }
        })
    );
}

#[test]
fn gateway_status_is_retryable_and_keeps_its_code() {
    let error = classify(RawFailure::Status(StatusCode::GATEWAY_TIMEOUT));

    assert_eq!(error.kind(), ErrorKind::DependencyUnavailable);
    assert!(error.retryable());
    assert_eq!(error.detail(detail_keys::STATUS_CODE), Some(&504.into()));
}

#[test]
fn unknown_failures_fail_closed() {
    let error = classify(io::Error::other("disk quota exceeded"));

    assert_eq!(error.kind(), ErrorKind::Internal);
    assert!(!error.retryable());
    assert!(std::error::Error::source(&error).is_some());
}
