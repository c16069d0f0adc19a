// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use bytes::Bytes;
use faultline::RawFailure;
use http::{Request, Response};

/// Sends one HTTP request and returns the whole response.
///
/// Implementations report transport-level failures as [`RawFailure`] so they classify like
/// any other dependency failure. Non-success status codes are not failures at this level;
/// the response is returned as is.
pub trait Transport: Send + Sync {
    /// Sends `request`.
    ///
    /// The returned future must be [`Send`] for compatibility with multi-threaded
    /// async runtimes.
    fn send(&self, request: Request<Bytes>) -> impl Future<Output = Result<Response<Bytes>, RawFailure>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, request: Request<Bytes>) -> impl Future<Output = Result<Response<Bytes>, RawFailure>> + Send {
        (**self).send(request)
    }
}

/// A [`Transport`] backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport over an existing client, sharing its connection pool.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, RawFailure> {
        let request = reqwest::Request::try_from(request).map_err(|e| RawFailure::InvalidInput(e.to_string()))?;
        let response = self.client.execute(request).await.map_err(failure_from)?;

        let mut builder = Response::builder().status(response.status()).version(response.version());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(response.headers().iter().map(|(name, value)| (name.clone(), value.clone())));
        }

        let body = response.bytes().await.map_err(failure_from)?;
        builder.body(body).map_err(|e| RawFailure::MalformedResponse(e.to_string()))
    }
}

fn failure_from(error: reqwest::Error) -> RawFailure {
    if error.is_timeout() {
        RawFailure::Timeout
    } else if error.is_connect() {
        RawFailure::Connection(Box::new(error))
    } else if error.is_decode() || error.is_body() {
        RawFailure::MalformedResponse(error.to_string())
    } else if error.is_builder() {
        RawFailure::InvalidInput(error.to_string())
    } else {
        RawFailure::Other(Box::new(error))
    }
}
