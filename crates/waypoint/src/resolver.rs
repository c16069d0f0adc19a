// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::table::{DEFAULT_HEALTH_PATH, join_health};
use crate::{Registry, ServiceRecord, ServiceTable, StaticEndpoints};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Builds the registry prefix under which a deployment registers its services.
///
/// # Examples
///
/// ```
/// assert_eq!(waypoint::registry_prefix("shopsmart", "production"), "/shopsmart/production/services");
/// ```
#[must_use]
pub fn registry_prefix(project: &str, environment: &str) -> String {
    format!("/{project}/{environment}/services")
}

/// Where a resolved endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointSource {
    /// A cached snapshot, fresh or kept after a failed refresh.
    Cache,

    /// A snapshot fetched from the registry during this resolution.
    Registry,

    /// Static configuration.
    Fallback,
}

impl EndpointSource {
    /// Short `snake_case` name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Registry => "registry",
            Self::Fallback => "fallback",
        }
    }
}

impl Display for EndpointSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved URL of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// The logical service name.
    pub service: String,

    /// Base URL without a trailing `/`, or the full health URL.
    pub url: String,

    /// Where the URL came from.
    pub source: EndpointSource,
}

/// Settings of an [`EndpointResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    prefix: String,
    ttl: Duration,
    discovery_enabled: bool,
}

impl ResolverOptions {
    /// Discovery under `/<project>/<environment>/services` with a five minute cache.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self::with_prefix(registry_prefix(project, environment))
    }

    /// Discovery under an explicit prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ttl: DEFAULT_TTL,
            discovery_enabled: true,
        }
    }

    /// How long a fetched snapshot is served without asking the registry again.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Turns registry reads on or off. When off, only static fallbacks are used.
    #[must_use]
    pub fn discovery(mut self, enabled: bool) -> Self {
        self.discovery_enabled = enabled;
        self
    }

    /// The registry prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Base,
    Health,
}

impl Target {
    fn from_record(self, record: &ServiceRecord) -> Option<String> {
        match self {
            Self::Base => record.base_url().map(str::to_owned),
            Self::Health => record.health_url(),
        }
    }

    fn from_fallback(self, base: &str) -> String {
        match self {
            Self::Base => base.to_owned(),
            Self::Health => join_health(base, DEFAULT_HEALTH_PATH),
        }
    }
}

/// Outcome of a refresh, as seen by one caller.
struct Refreshed {
    table: Option<Arc<ServiceTable>>,
    fetched: bool,
}

#[derive(Debug, Default)]
struct RefreshState {
    last_succeeded: bool,
}

/// Resolves logical service names to URLs.
///
/// The resolver keeps one immutable [`ServiceTable`] snapshot. Readers clone the `Arc` of
/// the current snapshot and never observe a partial update; a successful registry read
/// swaps in a whole new snapshot.
///
/// Refreshes are single-flight: when many callers find the snapshot expired, or missing
/// their service, at the same time, one of them reads the registry and the others wait
/// for it and reuse its outcome, success or failure.
///
/// # Examples
///
/// ```
/// # futures::executor::block_on(async {
/// use waypoint::{EndpointResolver, EndpointSource, InMemoryRegistry, ResolverOptions, StaticEndpoints};
///
/// let registry = InMemoryRegistry::new();
/// registry.put("/shop/dev/services/auth/full_url", "http://auth:8000");
///
/// let resolver = EndpointResolver::new(registry, ResolverOptions::new("shop", "dev"), StaticEndpoints::none());
///
/// let endpoint = resolver.resolve("auth").await.unwrap();
/// assert_eq!(endpoint.url, "http://auth:8000");
/// assert_eq!(endpoint.source, EndpointSource::Registry);
///
/// let again = resolver.resolve("auth").await.unwrap();
/// assert_eq!(again.source, EndpointSource::Cache);
/// # });
/// ```
#[derive(Debug)]
pub struct EndpointResolver<R> {
    registry: R,
    options: ResolverOptions,
    fallback: StaticEndpoints,
    snapshot: RwLock<Option<Arc<ServiceTable>>>,
    refresh_gate: tokio::sync::Mutex<RefreshState>,
    // Number of completed refresh attempts; lets waiters detect that a refresh happened
    // while they were queued on the gate.
    generation: AtomicU64,
}

impl<R: Registry> EndpointResolver<R> {
    /// Creates a resolver with an empty cache.
    pub fn new(registry: R, options: ResolverOptions, fallback: StaticEndpoints) -> Self {
        Self {
            registry,
            options,
            fallback,
            snapshot: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(RefreshState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// The resolver's settings.
    #[must_use]
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Resolves the base URL of `service`, or `None` if neither the registry nor the
    /// fallbacks know it.
    ///
    /// The registry is read when the snapshot expired or does not list `service`; a
    /// service the registry still does not know goes to the fallbacks.
    pub async fn resolve(&self, service: &str) -> Option<Endpoint> {
        self.find(service, Target::Base).await
    }

    /// Resolves the health check URL of `service`.
    ///
    /// Uses the registered `health_endpoint` property, `/health` when absent, and
    /// `<fallback>/health` for services only known statically.
    pub async fn resolve_health_endpoint(&self, service: &str) -> Option<Endpoint> {
        self.find(service, Target::Health).await
    }

    /// The current snapshot, refreshed first if it expired.
    pub async fn services(&self) -> Arc<ServiceTable> {
        let generation = self.generation.load(Ordering::Acquire);

        if let Some(table) = self.current() {
            if table.is_fresh(Instant::now()) {
                return table;
            }
        }

        if self.options.discovery_enabled {
            if let Some(table) = self.refresh(generation).await.table {
                return table;
            }
        }

        self.current()
            .unwrap_or_else(|| Arc::new(ServiceTable::parse(&self.options.prefix, Vec::new(), Instant::now(), Duration::ZERO)))
    }

    /// Marks the snapshot expired so the next resolution reads the registry. The expired
    /// snapshot still serves if that read fails.
    pub fn invalidate(&self) {
        let mut snapshot = self.snapshot.write();
        if let Some(table) = snapshot.as_ref() {
            *snapshot = Some(Arc::new(table.expired()));
        }
    }

    /// The current snapshot without refreshing it.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<ServiceTable>> {
        self.current()
    }

    async fn find(&self, service: &str, target: Target) -> Option<Endpoint> {
        // Read before inspecting the snapshot, so a refresh finishing in between is noticed.
        let generation = self.generation.load(Ordering::Acquire);
        let snapshot = self.current();

        let (table, source) = match snapshot {
            Some(table) if table.is_fresh(Instant::now()) && table.get(service).is_some() => (Some(table), EndpointSource::Cache),
            cached if self.options.discovery_enabled => {
                let refreshed = self.refresh(generation).await;
                let source = if refreshed.fetched {
                    EndpointSource::Registry
                } else {
                    EndpointSource::Cache
                };
                (refreshed.table.or(cached), source)
            }
            cached => (cached, EndpointSource::Cache),
        };

        if let Some(url) = table
            .as_deref()
            .and_then(|table| table.get(service))
            .and_then(|record| target.from_record(record))
        {
            tracing::event!(
                name: "waypoint.resolve",
                tracing::Level::DEBUG,
                service.name = service,
                endpoint.url = %url,
                endpoint.source = %source,
            );
            return Some(endpoint(service, url, source));
        }

        if let Some(base) = self.fallback.get(service) {
            let url = target.from_fallback(&base);
            tracing::event!(
                name: "waypoint.resolve",
                tracing::Level::INFO,
                service.name = service,
                endpoint.url = %url,
                endpoint.source = %EndpointSource::Fallback,
            );
            return Some(endpoint(service, url, EndpointSource::Fallback));
        }

        tracing::event!(
            name: "waypoint.resolve",
            tracing::Level::WARN,
            service.name = service,
            message = "service endpoint not found",
        );
        None
    }

    async fn refresh(&self, observed_generation: u64) -> Refreshed {
        let mut state = self.refresh_gate.lock().await;

        if self.generation.load(Ordering::Acquire) != observed_generation {
            return Refreshed {
                table: self.current(),
                fetched: state.last_succeeded,
            };
        }

        let result = self.registry.list(&self.options.prefix).await;
        let outcome = match result {
            Ok(entries) => {
                let table = Arc::new(ServiceTable::parse(&self.options.prefix, entries, Instant::now(), self.options.ttl));
                *self.snapshot.write() = Some(Arc::clone(&table));

                tracing::event!(
                    name: "waypoint.refresh",
                    tracing::Level::INFO,
                    registry.prefix = %self.options.prefix,
                    services.count = table.len(),
                );

                Refreshed {
                    table: Some(table),
                    fetched: true,
                }
            }
            Err(error) => {
                tracing::event!(
                    name: "waypoint.refresh",
                    tracing::Level::WARN,
                    registry.prefix = %self.options.prefix,
                    error = %error,
                    message = "registry read failed, keeping previous snapshot",
                );

                Refreshed {
                    table: self.current(),
                    fetched: false,
                }
            }
        };

        state.last_succeeded = outcome.fetched;
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    fn current(&self) -> Option<Arc<ServiceTable>> {
        self.snapshot.read().clone()
    }
}

fn endpoint(service: &str, url: String, source: EndpointSource) -> Endpoint {
    Endpoint {
        service: service.to_owned(),
        url,
        source,
    }
}
