// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Endpoint resolution against a registry whose reads are counted and can be made to fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use tracing_test::traced_test;
use waypoint::{
    EndpointResolver, EndpointSource, InMemoryRegistry, Registry, RegistryEntry, RegistryError, ResolverOptions, ServiceRecord,
    StaticEndpoints,
};

const TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct CountingRegistry {
    inner: InMemoryRegistry,
    reads: AtomicUsize,
    failing: AtomicBool,
}

impl CountingRegistry {
    fn with(entries: &[(&str, &str)]) -> Arc<Self> {
        let registry = Self::default();
        for (key, value) in entries {
            registry.inner.put(*key, *value);
        }
        Arc::new(registry)
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Registry for CountingRegistry {
    async fn list(&self, prefix: &str) -> Result<Vec<RegistryEntry>, RegistryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("connection reset".to_owned()));
        }

        self.inner.list(prefix).await
    }
}

fn options() -> ResolverOptions {
    ResolverOptions::new("shopsmart", "production").ttl(TTL)
}

fn auth_registered() -> Arc<CountingRegistry> {
    CountingRegistry::with(&[
        ("/shopsmart/production/services/auth/full_url", "http://auth:8000/"),
        ("/shopsmart/production/services/auth/health_endpoint", "/auth/health"),
        ("/shopsmart/production/services/product-catalog/full_url", "http://catalog:8001"),
    ])
}

#[tokio::test(start_paused = true)]
async fn fresh_snapshot_is_served_without_registry_reads() {
    let registry = auth_registered();
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());

    let first = resolver.resolve("auth").await.unwrap();
    let second = resolver.resolve("auth").await.unwrap();
    let catalog = resolver.resolve("product-catalog").await.unwrap();

    assert_eq!(first.url, "http://auth:8000");
    assert_eq!(first.source, EndpointSource::Registry);
    assert_eq!(second.source, EndpointSource::Cache);
    assert_eq!(catalog.source, EndpointSource::Cache);
    assert_eq!(registry.reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_snapshot_is_refreshed() {
    let registry = auth_registered();
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());

    resolver.resolve("auth").await.unwrap();
    registry.inner.put("/shopsmart/production/services/auth/full_url", "http://auth-v2:8000");

    tokio::time::advance(TTL - Duration::from_secs(1)).await;
    assert_eq!(resolver.resolve("auth").await.unwrap().url, "http://auth:8000");

    tokio::time::advance(Duration::from_secs(1)).await;
    let refreshed = resolver.resolve("auth").await.unwrap();

    assert_eq!(refreshed.url, "http://auth-v2:8000");
    assert_eq!(refreshed.source, EndpointSource::Registry);
    assert_eq!(registry.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_resolves_share_one_registry_read() {
    let registry = auth_registered();
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());

    let endpoints = join_all((0..16).map(|_| resolver.resolve("auth"))).await;

    assert_eq!(registry.reads(), 1);
    for endpoint in endpoints {
        let endpoint = endpoint.unwrap();
        assert_eq!(endpoint.url, "http://auth:8000");
        assert_eq!(endpoint.source, EndpointSource::Registry);
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_resolves_share_a_failed_read() {
    let registry = CountingRegistry::with(&[]);
    registry.fail(true);
    let fallback = StaticEndpoints::none().with("auth", "http://auth.fallback");
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), fallback);

    let endpoints = join_all((0..8).map(|_| resolver.resolve("auth"))).await;

    assert_eq!(registry.reads(), 1);
    assert!(endpoints.iter().all(|e| e.as_ref().unwrap().source == EndpointSource::Fallback));
}

#[tokio::test(start_paused = true)]
async fn stale_snapshot_survives_registry_failure() {
    let registry = auth_registered();
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());
    resolver.resolve("auth").await.unwrap();

    registry.fail(true);
    tokio::time::advance(TTL + Duration::from_secs(60)).await;

    let stale = resolver.resolve("auth").await.unwrap();
    assert_eq!(stale.url, "http://auth:8000");
    assert_eq!(stale.source, EndpointSource::Cache);
    assert_eq!(registry.reads(), 2);

    registry.fail(false);
    registry.inner.put("/shopsmart/production/services/auth/full_url", "http://auth-v2:8000");

    let recovered = resolver.resolve("auth").await.unwrap();
    assert_eq!(recovered.url, "http://auth-v2:8000");
    assert_eq!(recovered.source, EndpointSource::Registry);
}

#[tokio::test(start_paused = true)]
async fn unregistered_service_uses_environment_fallback() {
    let registry = CountingRegistry::with(&[]);
    let fallback = StaticEndpoints::from_lookup(|var| (var == "AUTH_SERVICE_URL").then(|| "http://x".to_owned()));
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), fallback);

    let endpoint = resolver.resolve("auth").await.unwrap();

    assert_eq!(endpoint.url, "http://x");
    assert_eq!(endpoint.source, EndpointSource::Fallback);
    assert_eq!(registry.reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_service_resolves_to_none() {
    let registry = auth_registered();
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());

    assert_eq!(resolver.resolve("billing").await, None);
    assert_eq!(resolver.resolve_health_endpoint("billing").await, None);
    assert_eq!(registry.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn service_registered_after_last_read_is_discovered() {
    let registry = auth_registered();
    let fallback = StaticEndpoints::none().with("order-processing", "http://orders.static");
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), fallback);

    resolver.resolve("auth").await.unwrap();
    registry.inner.put("/shopsmart/production/services/order-processing/full_url", "http://orders:8002");

    let orders = resolver.resolve("order-processing").await.unwrap();

    assert_eq!(orders.url, "http://orders:8002");
    assert_eq!(orders.source, EndpointSource::Registry);
    assert_eq!(registry.reads(), 2);

    assert_eq!(resolver.resolve("auth").await.unwrap().source, EndpointSource::Cache);
    assert_eq!(registry.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_registry_reply_is_not_a_cache_hit() {
    let registry = CountingRegistry::with(&[]);
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());

    assert_eq!(resolver.resolve("auth").await, None);

    registry.inner.put("/shopsmart/production/services/auth/full_url", "http://auth:8000");
    let auth = resolver.resolve("auth").await.unwrap();

    assert_eq!(auth.url, "http://auth:8000");
    assert_eq!(auth.source, EndpointSource::Registry);
    assert_eq!(registry.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_on_fresh_snapshot_share_one_read() {
    let registry = auth_registered();
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());
    resolver.resolve("auth").await.unwrap();

    let endpoints = join_all((0..8).map(|_| resolver.resolve("billing"))).await;

    assert!(endpoints.iter().all(Option::is_none));
    assert_eq!(registry.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn health_endpoints() {
    let fallback = StaticEndpoints::none().with("inventory", "http://inventory:9000/");
    let resolver = EndpointResolver::new(auth_registered(), options(), fallback);

    let auth = resolver.resolve_health_endpoint("auth").await.unwrap();
    let catalog = resolver.resolve_health_endpoint("product-catalog").await.unwrap();
    let inventory = resolver.resolve_health_endpoint("inventory").await.unwrap();

    assert_eq!(auth.url, "http://auth:8000/auth/health");
    assert_eq!(catalog.url, "http://catalog:8001/health");
    assert_eq!(inventory.url, "http://inventory:9000/health");
    assert_eq!(inventory.source, EndpointSource::Fallback);
}

#[tokio::test(start_paused = true)]
async fn disabled_discovery_never_reads_the_registry() {
    let registry = auth_registered();
    let fallback = StaticEndpoints::none().with("auth", "http://auth.static");
    let resolver = EndpointResolver::new(Arc::clone(&registry), options().discovery(false), fallback);

    let endpoint = resolver.resolve("auth").await.unwrap();

    assert_eq!(endpoint.url, "http://auth.static");
    assert_eq!(endpoint.source, EndpointSource::Fallback);
    assert!(resolver.services().await.is_empty());
    assert_eq!(registry.reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn invalidate_forces_the_next_read() {
    let registry = auth_registered();
    let resolver = EndpointResolver::new(Arc::clone(&registry), options(), StaticEndpoints::none());

    let table = resolver.services().await;
    let names: Vec<_> = table.services().map(ServiceRecord::name).collect();
    assert_eq!(names, vec!["auth", "product-catalog"]);

    resolver.invalidate();
    assert!(resolver.cached().is_some());

    assert_eq!(resolver.resolve("auth").await.unwrap().source, EndpointSource::Registry);
    assert_eq!(registry.reads(), 2);
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn registry_failure_and_fallback_are_logged() {
    let registry = CountingRegistry::with(&[]);
    registry.fail(true);
    let fallback = StaticEndpoints::none().with("auth", "http://auth.fallback");
    let resolver = EndpointResolver::new(registry, options(), fallback);

    resolver.resolve("auth").await.unwrap();
    assert_eq!(resolver.resolve("billing").await, None);

    assert!(logs_contain("registry read failed"));
    assert!(logs_contain("connection reset"));
    assert!(logs_contain("endpoint.source=fallback"));
    assert!(logs_contain("service endpoint not found"));
}
