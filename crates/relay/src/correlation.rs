// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

/// Header carrying the correlation identifier between services.
pub const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Identifier joining every log line of one logical request across services.
///
/// Created once at the inbound boundary and read-only afterwards. Cloning is cheap.
///
/// # Examples
///
/// ```
/// use http::HeaderMap;
/// use relay::{CORRELATION_HEADER, CorrelationContext};
///
/// let mut headers = HeaderMap::new();
/// headers.insert(CORRELATION_HEADER, "req-7f3a".parse().unwrap());
///
/// assert_eq!(CorrelationContext::from_headers(&headers).id(), "req-7f3a");
/// assert_eq!(CorrelationContext::from_headers(&HeaderMap::new()).id().len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationContext {
    id: Arc<str>,
}

impl CorrelationContext {
    /// A context with a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string().into(),
        }
    }

    /// A context with the given identifier, or a fresh one if `id` is blank.
    #[must_use]
    pub fn with_id(id: &str) -> Self {
        let id = id.trim();
        if id.is_empty() {
            return Self::new();
        }

        Self { id: id.into() }
    }

    /// Reads the identifier sent by the caller, generating one if the header is missing,
    /// blank or not valid text.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(&CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map_or_else(Self::new, Self::with_id)
    }

    /// The identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The identifier as a header value, if it is valid in one.
    #[must_use]
    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.id).ok()
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CorrelationContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
