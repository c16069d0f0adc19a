// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Environment variables of the services whose names do not follow the generic pattern.
const WELL_KNOWN: [(&str, &str); 3] = [
    ("auth", "AUTH_SERVICE_URL"),
    ("product-catalog", "PRODUCT_SERVICE_URL"),
    ("order-processing", "ORDER_PROCESSING_SERVICE_URL"),
];

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Statically configured service URLs used when the registry does not know a service.
///
/// Explicit entries win over the lookup function. The default lookup reads environment
/// variables named by [`env_var_name`].
///
/// # Examples
///
/// ```
/// use waypoint::StaticEndpoints;
///
/// let endpoints = StaticEndpoints::from_lookup(|var| (var == "AUTH_SERVICE_URL").then(|| "http://auth/".to_owned()))
///     .with("inventory", "http://inventory:9000");
///
/// assert_eq!(endpoints.get("auth").as_deref(), Some("http://auth"));
/// assert_eq!(endpoints.get("inventory").as_deref(), Some("http://inventory:9000"));
/// assert_eq!(endpoints.get("billing"), None);
/// ```
#[derive(Clone, Default)]
pub struct StaticEndpoints {
    explicit: BTreeMap<String, String>,
    lookup: Option<Lookup>,
}

impl Debug for StaticEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticEndpoints")
            .field("explicit", &self.explicit)
            .field("lookup", &self.lookup.as_ref().map(|_| "fn"))
            .finish()
    }
}

impl StaticEndpoints {
    /// No fallbacks at all.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Reads fallbacks from the process environment on every lookup.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads fallbacks through `lookup`, which receives the variable name.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            explicit: BTreeMap::new(),
            lookup: Some(Arc::new(lookup)),
        }
    }

    /// Adds an explicit URL for `service`.
    #[must_use]
    pub fn with(mut self, service: impl Into<String>, url: impl Into<String>) -> Self {
        self.explicit.insert(service.into(), url.into());
        self
    }

    /// The fallback base URL for `service`, without a trailing `/`.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<String> {
        let url = self
            .explicit
            .get(service)
            .cloned()
            .or_else(|| self.lookup.as_ref().and_then(|lookup| lookup(&env_var_name(service))))?;

        let url = url.trim().trim_end_matches('/');
        (!url.is_empty()).then(|| url.to_owned())
    }
}

/// The environment variable holding the fallback URL of `service`.
///
/// # Examples
///
/// ```
/// use waypoint::env_var_name;
///
/// assert_eq!(env_var_name("product-catalog"), "PRODUCT_SERVICE_URL");
/// assert_eq!(env_var_name("shipping-quotes"), "SHIPPING_QUOTES_SERVICE_URL");
/// ```
#[must_use]
pub fn env_var_name(service: &str) -> String {
    if let Some((_, var)) = WELL_KNOWN.iter().find(|(name, _)| *name == service) {
        return (*var).to_owned();
    }

    format!("{}_SERVICE_URL", service.to_uppercase().replace('-', "_"))
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names() {
        assert_eq!(env_var_name("auth"), "AUTH_SERVICE_URL");
        assert_eq!(env_var_name("product-catalog"), "PRODUCT_SERVICE_URL");
        assert_eq!(env_var_name("order-processing"), "ORDER_PROCESSING_SERVICE_URL");
        assert_eq!(env_var_name("recommendations"), "RECOMMENDATIONS_SERVICE_URL");
    }

    #[test]
    fn explicit_entries_win() {
        let endpoints = StaticEndpoints::from_lookup(|_| Some("http://from-lookup".to_owned())).with("auth", "http://explicit");

        assert_eq!(endpoints.get("auth").as_deref(), Some("http://explicit"));
        assert_eq!(endpoints.get("orders").as_deref(), Some("http://from-lookup"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let endpoints = StaticEndpoints::from_lookup(|_| Some("  ".to_owned()));
        assert_eq!(endpoints.get("auth"), None);
        assert_eq!(StaticEndpoints::none().get("auth"), None);
    }
}
