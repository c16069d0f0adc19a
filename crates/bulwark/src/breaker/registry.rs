// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::{BreakerOptions, BreakerSnapshot, CircuitBreaker};
use crate::{PolicyError, Telemetry};

/// Process-owned set of circuit breakers, one per dependency name.
///
/// Breakers are created on first use and live as long as the registry. Lookups for
/// different dependencies do not contend on a single lock.
///
/// # Examples
///
/// ```
/// use bulwark::{BreakerOptions, BreakerRegistry};
///
/// let registry = BreakerRegistry::new(BreakerOptions::default())?
///     .with_override("auth", BreakerOptions::default().failure_threshold(3))?;
///
/// let auth = registry.get_or_create("auth");
/// assert_eq!(auth.options().threshold(), 3);
/// assert!(std::sync::Arc::ptr_eq(&auth, &registry.get_or_create("auth")));
/// # Ok::<(), bulwark::PolicyError>(())
/// ```
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerOptions,
    overrides: HashMap<String, BreakerOptions>,
    telemetry: Telemetry,
}

impl BreakerRegistry {
    /// Creates an empty registry whose breakers use `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if `defaults` are invalid.
    pub fn new(defaults: BreakerOptions) -> Result<Self, PolicyError> {
        defaults.validate()?;

        Ok(Self {
            breakers: DashMap::new(),
            defaults,
            overrides: HashMap::new(),
            telemetry: Telemetry::default(),
        })
    }

    /// Uses `options` instead of the defaults for the dependency `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if `options` are invalid.
    pub fn with_override(mut self, name: impl Into<String>, options: BreakerOptions) -> Result<Self, PolicyError> {
        options.validate()?;
        self.overrides.insert(name.into(), options);
        Ok(self)
    }

    /// Telemetry sink handed to every breaker the registry creates.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the breaker for `name`, creating it on first use.
    #[must_use]
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return Arc::clone(breaker.value());
        }

        let breaker = self
            .breakers
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(self.create(name)));

        Arc::clone(breaker.value())
    }

    /// Returns the breaker for `name` if it was created.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|breaker| Arc::clone(breaker.value()))
    }

    /// Snapshots of all breakers, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Number of breakers created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker was created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn create(&self, name: &str) -> CircuitBreaker {
        // Options were validated when they entered the registry.
        let options = self.overrides.get(name).unwrap_or(&self.defaults).clone();
        CircuitBreaker::from_validated(name.to_owned().into(), options, self.telemetry.clone())
    }
}
