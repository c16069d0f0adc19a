// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Checks product availability through a flaky catalog service.
//!
//! The catalog is simulated by a transport that fails most requests, so the output shows
//! retries, the breaker opening, and the resulting error bodies.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use faultline::{ErrorBody, RawFailure};
use http::{Request, Response, StatusCode};
use relay::config::ClientConfig;
use relay::{CorrelationContext, OutboundRequest, ResilientClient, Transport};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use waypoint::InMemoryRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    let registry = InMemoryRegistry::new();
    registry.put("/shopsmart/production/services/product-catalog/full_url", "http://catalog.internal:8001");

    let config = ClientConfig::from_json(
        r#"{
            "endpoints_from_env": false,
            "retry": { "max_attempts": 3, "base_delay_ms": 50 },
            "breaker": { "failure_threshold": 2, "recovery_timeout_secs": 1 }
        }"#,
    )?;

    let client = ResilientClient::with_transport(&config, registry, FlakyCatalog::default())?;

    for order in 1..=4 {
        let ctx = CorrelationContext::new();
        let request = OutboundRequest::post("/products/desk-042/availability").json(&serde_json::json!({ "quantity": order }))?;

        match client.send(&ctx, "product-catalog", request).await {
            Ok(response) => println!("order {order}: {}", response.text()?),
            Err(error) => println!("order {order}: {}", serde_json::to_string(&ErrorBody::from_error(&error, Some(ctx.id().to_owned())))?),
        }
    }

    for snapshot in client.breaker_snapshots() {
        println!("{}: {} after {} failures", snapshot.name, snapshot.state, snapshot.consecutive_failures);
    }

    Ok(())
}

/// Answers one request in four, fails the rest with 503.
#[derive(Debug, Default)]
struct FlakyCatalog {
    requests: AtomicU32,
}

impl Transport for FlakyCatalog {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, RawFailure> {
        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        println!("  -> {} {} (request #{})", request.method(), request.uri(), n + 1);

        let (status, body) = if n % 4 == 3 {
            (StatusCode::OK, r#"{"available":true}"#)
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "")
        };

        Response::builder()
            .status(status)
            .body(Bytes::from_static(body.as_bytes()))
            .map_err(|e| RawFailure::MalformedResponse(e.to_string()))
    }
}
