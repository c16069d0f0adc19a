// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bulwark::{Attempt, BreakerRegistry, BreakerSnapshot, RetryPolicy, Telemetry};
use bytes::Bytes;
use faultline::{Classify, RawFailure, ServiceError, detail_keys};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Instrument;
use waypoint::{Endpoint, EndpointResolver, EndpointSource, Registry};

use crate::config::{ClientConfig, ConfigError};
use crate::{CORRELATION_HEADER, CorrelationContext, HttpTransport, Transport};

/// Where one attempt of a call should go.
#[derive(Debug, Clone)]
pub struct CallTarget {
    service: String,
    base_url: String,
    source: EndpointSource,
    correlation: CorrelationContext,
    attempt: Attempt,
}

impl CallTarget {
    fn new(endpoint: &Endpoint, correlation: &CorrelationContext, attempt: Attempt) -> Self {
        Self {
            service: endpoint.service.clone(),
            base_url: endpoint.url.clone(),
            source: endpoint.source,
            correlation: correlation.clone(),
            attempt,
        }
    }

    /// The logical service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The resolved URL, without a trailing `/`.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `path` appended to the resolved URL.
    ///
    /// ```
    /// # use relay::CallTarget;
    /// # fn demo(target: &CallTarget) {
    /// let url = target.url("/products/42/availability");
    /// # }
    /// ```
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        match path {
            "" => self.base_url.clone(),
            path if path.starts_with('/') => format!("{}{path}", self.base_url),
            path => format!("{}/{path}", self.base_url),
        }
    }

    /// Where the URL came from.
    #[must_use]
    pub fn source(&self) -> EndpointSource {
        self.source
    }

    /// The correlation context of the call.
    #[must_use]
    pub fn correlation(&self) -> &CorrelationContext {
        &self.correlation
    }

    /// The attempt being made.
    #[must_use]
    pub fn attempt(&self) -> Attempt {
        self.attempt
    }
}

/// An HTTP request relative to a service's resolved URL.
///
/// # Examples
///
/// ```
/// use relay::OutboundRequest;
///
/// let request = OutboundRequest::post("/products/42/reserve").json(&[("quantity", 2)])?;
/// assert_eq!(request.path(), "/products/42/reserve");
/// # Ok::<(), faultline::ServiceError>(())
/// ```
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
}

impl OutboundRequest {
    /// A request with an empty body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A `POST` request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// A `PUT` request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// A `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Adds a header, replacing earlier values of the same name.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body and its content type.
    ///
    /// # Errors
    ///
    /// Returns a [`Validation`][faultline::ErrorKind::Validation] error if `body` cannot
    /// be serialized.
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, ServiceError> {
        let bytes = serde_json::to_vec(body).map_err(|e| ServiceError::validation("request body is not serializable").caused_by(e))?;

        Ok(self
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(bytes))
    }

    /// The method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path relative to the service URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn to_http(&self, target: &CallTarget, user_agent: &HeaderValue) -> Result<Request<Bytes>, RawFailure> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(target.url(&self.path))
            .body(self.body.clone())
            .map_err(|e| RawFailure::InvalidInput(e.to_string()))?;

        let headers = request.headers_mut();
        headers.extend(self.headers.clone());
        headers.insert(USER_AGENT, user_agent.clone());
        if let Some(correlation_id) = target.correlation().header_value() {
            headers.insert(CORRELATION_HEADER, correlation_id);
        }

        Ok(request)
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl OutboundResponse {
    /// The status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an [`Internal`][faultline::ErrorKind::Internal] error if the body is not
    /// UTF-8.
    pub fn text(&self) -> Result<&str, ServiceError> {
        std::str::from_utf8(&self.body).map_err(|e| ServiceError::internal("response body is not UTF-8").caused_by(e))
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an [`Internal`][faultline::ErrorKind::Internal] error if the body does not
    /// decode into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_slice(&self.body).map_err(|e| ServiceError::internal(format!("malformed response body: {e}")).caused_by(e))
    }
}

impl From<Response<Bytes>> for OutboundResponse {
    fn from(response: Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Lookup {
    Base,
    Health,
}

/// Calls other services through discovery, retry and circuit breaking.
///
/// For each call the client resolves the service's endpoint, takes the dependency's
/// circuit breaker (creating it on first use) and runs the operation under the retry
/// policy inside the breaker. The breaker sees the outcome of the whole retried call.
/// Every error leaving the client carries the `service_name` and `correlation_id`
/// details, and all logs of a call are emitted inside a `relay.call` span.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use faultline::ServiceError;
/// use relay::config::ClientConfig;
/// use relay::{CorrelationContext, ResilientClient};
/// use waypoint::InMemoryRegistry;
///
/// let registry = InMemoryRegistry::new();
/// registry.put("/shopsmart/production/services/auth/full_url", "http://auth:8000");
///
/// let client = ResilientClient::new(&ClientConfig::default(), registry)?;
/// let ctx = CorrelationContext::new();
///
/// let url = client
///     .call(&ctx, "auth", |target| async move { Ok::<_, ServiceError>(target.url("/auth/validate/s-1")) })
///     .await?;
///
/// assert_eq!(url, "http://auth:8000/auth/validate/s-1");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct ResilientClient<R, T = HttpTransport> {
    resolver: EndpointResolver<R>,
    transport: T,
    breakers: BreakerRegistry,
    default_retry: RetryPolicy,
    retry_overrides: HashMap<String, RetryPolicy>,
    telemetry: Telemetry,
    user_agent: HeaderValue,
    timeout: Duration,
}

impl<R: Registry> ResilientClient<R> {
    /// Creates a client sending requests over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(config: &ClientConfig, registry: R) -> Result<Self, ConfigError> {
        Self::with_transport(config, registry, HttpTransport::new())
    }
}

impl<R: Registry, T: Transport> ResilientClient<R, T> {
    /// Creates a client sending requests through `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn with_transport(config: &ClientConfig, registry: R, transport: T) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut breakers = BreakerRegistry::new(config.breaker.to_options()?)?;
        let mut retry_overrides = HashMap::new();
        for (name, dependency) in &config.dependencies {
            if let Some(breaker) = &dependency.breaker {
                breakers = breakers.with_override(name.clone(), breaker.to_options()?)?;
            }
            if let Some(retry) = &dependency.retry {
                retry_overrides.insert(name.clone(), retry.to_policy()?);
            }
        }

        let user_agent = HeaderValue::from_str(&config.user_agent).map_err(|e| ConfigError::Invalid {
            problems: vec![format!("user_agent: {e}")],
        })?;

        Ok(Self {
            resolver: EndpointResolver::new(registry, config.resolver_options(), config.static_endpoints()),
            transport,
            breakers,
            default_retry: config.retry.to_policy()?,
            retry_overrides,
            telemetry: Telemetry::default(),
            user_agent,
            timeout: config.timeout(),
        })
    }

    /// Sends retry and breaker events to `telemetry`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.breakers = self.breakers.with_telemetry(telemetry.clone());
        self.telemetry = telemetry;
        self
    }

    /// Runs `operation` against the resolved endpoint of `service`.
    ///
    /// `operation` is invoked once per attempt with the target of that attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DependencyUnavailable`][faultline::ErrorKind::DependencyUnavailable] if no
    /// endpoint is known, [`CircuitOpen`][faultline::ErrorKind::CircuitOpen] if the
    /// dependency's breaker rejects the call, and otherwise the classified error of the
    /// last attempt.
    pub async fn call<O, E, F, Fut>(&self, ctx: &CorrelationContext, service: &str, operation: F) -> Result<O, ServiceError>
    where
        F: FnMut(CallTarget) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Classify,
    {
        self.run(ctx, service, Lookup::Base, operation).await
    }

    /// Sends `request` to `service` and returns its successful response.
    ///
    /// Each attempt carries the `user-agent` and `x-correlation-id` headers and is bounded
    /// by the configured timeout. Non-2xx responses are classified by status code.
    ///
    /// # Errors
    ///
    /// See [`call`][Self::call].
    pub async fn send(&self, ctx: &CorrelationContext, service: &str, request: OutboundRequest) -> Result<OutboundResponse, ServiceError> {
        self.run(ctx, service, Lookup::Base, |target| self.attempt(&request, target))
            .await
    }

    /// Sends a `GET` to the health endpoint of `service`.
    ///
    /// # Errors
    ///
    /// See [`call`][Self::call].
    pub async fn health(&self, ctx: &CorrelationContext, service: &str) -> Result<OutboundResponse, ServiceError> {
        let request = OutboundRequest::get("");
        self.run(ctx, service, Lookup::Health, |target| self.attempt(&request, target))
            .await
    }

    /// The endpoint resolver.
    pub fn resolver(&self) -> &EndpointResolver<R> {
        &self.resolver
    }

    /// The circuit breakers, one per dependency called so far.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The state of every breaker, ordered by dependency name.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// The retry policy used for `service`.
    pub fn retry_policy(&self, service: &str) -> &RetryPolicy {
        self.retry_overrides.get(service).unwrap_or(&self.default_retry)
    }

    async fn run<O, E, F, Fut>(&self, ctx: &CorrelationContext, service: &str, lookup: Lookup, mut operation: F) -> Result<O, ServiceError>
    where
        F: FnMut(CallTarget) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Classify,
    {
        let span = tracing::info_span!("relay.call", service, correlation_id = %ctx);

        let result = async {
            let endpoint = match lookup {
                Lookup::Base => self.resolver.resolve(service).await,
                Lookup::Health => self.resolver.resolve_health_endpoint(service).await,
            }
            .ok_or_else(|| ServiceError::unavailable(format!("no endpoint available for service '{service}'")))?;

            let breaker = self.breakers.get_or_create(service);
            let retry = self.retry_policy(service);
            let operation = &mut operation;
            let telemetry = &self.telemetry;

            breaker
                .guard(move || {
                    retry.execute_observed(service, telemetry, move |attempt| operation(CallTarget::new(&endpoint, ctx, attempt)))
                })
                .await
        }
        .instrument(span.clone())
        .await;

        result.map_err(|error| {
            let error = error
                .with_detail(detail_keys::SERVICE_NAME, service)
                .with_detail(detail_keys::CORRELATION_ID, ctx.id());

            span.in_scope(|| {
                tracing::event!(
                    name: "relay.call",
                    tracing::Level::WARN,
                    error.kind = %error.kind(),
                    error.message = error.message(),
                );
            });

            error
        })
    }

    async fn attempt(&self, request: &OutboundRequest, target: CallTarget) -> Result<OutboundResponse, RawFailure> {
        let request = request.to_http(&target, &self.user_agent)?;

        let Ok(sent) = tokio::time::timeout(self.timeout, self.transport.send(request)).await else {
            return Err(RawFailure::Timeout);
        };

        let response = sent?;
        if response.status().is_success() {
            Ok(response.into())
        } else {
            Err(RawFailure::Status(response.status()))
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use faultline::ErrorKind;

    use super::*;

    fn target(url: &str) -> CallTarget {
        let endpoint = Endpoint {
            service: "product-catalog".to_owned(),
            url: url.to_owned(),
            source: EndpointSource::Registry,
        };
        CallTarget::new(&endpoint, &CorrelationContext::with_id("c-1"), Attempt::first(3))
    }

    #[test]
    fn joins_paths() {
        let target = target("http://catalog:8001");

        assert_eq!(target.url(""), "http://catalog:8001");
        assert_eq!(target.url("/products/1"), "http://catalog:8001/products/1");
        assert_eq!(target.url("products/1"), "http://catalog:8001/products/1");
        assert_eq!(target.service(), "product-catalog");
        assert_eq!(target.attempt().number(), 1);
    }

    #[test]
    fn request_carries_headers() {
        let request = OutboundRequest::post("/products/1/reserve")
            .header(HeaderName::from_static("x-tenant"), HeaderValue::from_static("eu"))
            .json(&serde_json::json!({ "quantity": 2 }))
            .unwrap();

        let http = request.to_http(&target("http://catalog:8001"), &HeaderValue::from_static("relay-test")).unwrap();

        assert_eq!(http.method(), Method::POST);
        assert_eq!(http.uri(), "http://catalog:8001/products/1/reserve");
        assert_eq!(http.headers()[USER_AGENT], "relay-test");
        assert_eq!(http.headers()[CORRELATION_HEADER], "c-1");
        assert_eq!(http.headers()["x-tenant"], "eu");
        assert_eq!(http.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(http.body().as_ref(), br#"{"quantity":2}"#);
    }

    #[test]
    fn invalid_uri_is_a_validation_failure() {
        let request = OutboundRequest::get("/with space");
        let failure = request.to_http(&target("http://catalog"), &HeaderValue::from_static("ua")).unwrap_err();

        assert_eq!(faultline::classify(failure).kind(), ErrorKind::Validation);
    }

    #[test]
    fn response_decoding() {
        let response = OutboundResponse::from(Response::new(Bytes::from_static(br#"{"available":true}"#)));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<serde_json::Value>().unwrap()["available"], true);
        assert_eq!(response.text().unwrap(), r#"{"available":true}"#);

        let error = response.json::<Vec<u32>>().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Internal);
        assert!(error.cause().is_some());
    }
}
