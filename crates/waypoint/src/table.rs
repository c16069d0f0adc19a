// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::RegistryEntry;

/// Property holding a service's base URL.
pub const FULL_URL: &str = "full_url";

/// Property holding a service's health path or absolute health URL.
pub const HEALTH_ENDPOINT: &str = "health_endpoint";

/// Health path used when a service does not register one.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// What the registry knows about one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    name: String,
    properties: BTreeMap<String, String>,
}

impl ServiceRecord {
    /// Creates a record from its raw properties.
    #[must_use]
    pub fn new(name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// The service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered base URL without a trailing `/`, if any.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.properties
            .get(FULL_URL)
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    /// The health endpoint: an absolute `http(s)` value as registered, otherwise the
    /// registered or default path appended to the base URL.
    #[must_use]
    pub fn health_url(&self) -> Option<String> {
        let base = self.base_url()?;
        let path = self.properties.get(HEALTH_ENDPOINT).map_or(DEFAULT_HEALTH_PATH, String::as_str);

        Some(join_health(base, path))
    }

    /// A raw property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// All raw properties.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

pub(crate) fn join_health(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }

    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// An immutable snapshot of every service discovered in one registry read.
#[derive(Debug, Clone)]
pub struct ServiceTable {
    services: BTreeMap<String, ServiceRecord>,
    fetched_at: Instant,
    ttl: Duration,
}

impl ServiceTable {
    /// Builds a table from the entries listed under `prefix`.
    ///
    /// Keys are expected as `<prefix>/<service>/<property>`. Keys outside the prefix or with
    /// fewer than two segments after it are skipped; deeper segments are ignored.
    #[must_use]
    pub fn parse(prefix: &str, entries: impl IntoIterator<Item = RegistryEntry>, fetched_at: Instant, ttl: Duration) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let mut grouped: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

        for entry in entries {
            let Some(rest) = entry.key.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('/')) else {
                continue;
            };

            let mut segments = rest.split('/');
            let (Some(service), Some(property)) = (segments.next(), segments.next()) else {
                continue;
            };

            if service.is_empty() || property.is_empty() {
                continue;
            }

            grouped
                .entry(service.to_owned())
                .or_default()
                .insert(property.to_owned(), entry.value);
        }

        let services = grouped
            .into_iter()
            .map(|(name, properties)| (name.clone(), ServiceRecord::new(name, properties)))
            .collect();

        Self { services, fetched_at, ttl }
    }

    /// Whether the table may still be served without asking the registry.
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }

    /// Looks up one service.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<&ServiceRecord> {
        self.services.get(service)
    }

    /// All services, ordered by name.
    pub fn services(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.services.values()
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no service was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// When the registry was read.
    #[must_use]
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// How long the table stays fresh.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn expired(&self) -> Self {
        Self {
            ttl: Duration::ZERO,
            ..self.clone()
        }
    }
}
