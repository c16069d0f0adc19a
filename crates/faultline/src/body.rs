// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ErrorKind, ServiceError};

/// User-facing serialized form of a [`ServiceError`].
///
/// Serializes as `{"error": {"message", "code", "details", "timestamp", "request_id"}}`.
/// The cause of the error is not serialized; failure chains stay in logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error envelope.
    pub error: ErrorPayload,
}

/// Contents of an [`ErrorBody`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: String,

    /// Stable machine-readable code, see [`ErrorKind::code`].
    pub code: String,

    /// Structured context.
    #[serde(default)]
    pub details: BTreeMap<String, Value>,

    /// When the body was produced.
    pub timestamp: Timestamp,

    /// Identifier of the inbound request, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorBody {
    /// Builds a body for `error`, stamped with the current time.
    #[must_use]
    pub fn from_error(error: &ServiceError, request_id: Option<String>) -> Self {
        Self::at(error, request_id, Timestamp::now())
    }

    /// Builds a body for `error` with an explicit timestamp.
    #[must_use]
    pub fn at(error: &ServiceError, request_id: Option<String>, timestamp: Timestamp) -> Self {
        Self {
            error: ErrorPayload {
                message: error.message().to_owned(),
                code: error.kind().code().to_owned(),
                details: error.details().clone(),
                timestamp,
                request_id,
            },
        }
    }

    /// Looks up the [`ErrorKind`] named by the body's code, if it is a known one.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::ALL.into_iter().find(|kind| kind.code() == self.error.code)
    }
}

impl From<&ServiceError> for ErrorBody {
    fn from(error: &ServiceError) -> Self {
        Self::from_error(error, None)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::detail_keys;

    #[test]
    fn serializes_envelope_without_cause() {
        let error = ServiceError::unavailable("order-processing is unavailable")
            .with_detail(detail_keys::SERVICE_NAME, "order-processing")
            .caused_by(io::Error::other("secret connection string in here"));
        let timestamp: Timestamp = "2024-05-01T12:00:00Z".parse().unwrap();

        let body = ErrorBody::at(&error, Some("req-1".to_owned()), timestamp);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(
            json,
            json!({
                "error": {
                    "message": "order-processing is unavailable",
                    "code": "DEPENDENCY_UNAVAILABLE",
                    "details": { "service_name": "order-processing" },
                    "timestamp": "2024-05-01T12:00:00Z",
                    "request_id": "req-1",
                }
            })
        );
        assert!(!json.to_string().contains("secret"));
    }

    #[test]
    fn request_id_is_omitted_when_unknown() {
        let body = ErrorBody::from(&ServiceError::validation("bad email"));
        let json = serde_json::to_value(&body).unwrap();

        assert!(json["error"].get("request_id").is_none());
        assert_eq!(body.kind(), Some(ErrorKind::Validation));
    }

    #[test]
    fn deserializes_back() {
        let body = ErrorBody::from(&ServiceError::new(ErrorKind::CircuitOpen, "breaker open"));
        let text = serde_json::to_string(&body).unwrap();

        let parsed: ErrorBody = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, body);
    }
}
