// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serializable settings of a [`ResilientClient`][crate::ResilientClient].
//!
//! Settings come from JSON ([`ClientConfig::from_json`]) or from the environment variables
//! the services are deployed with ([`ClientConfig::from_env`]). Every field has a default,
//! so partial documents are accepted.
//!
//! ```
//! use relay::config::ClientConfig;
//!
//! let config = ClientConfig::from_json(
//!     r#"{
//!         "timeout_secs": 5,
//!         "retry": { "max_attempts": 4 },
//!         "dependencies": { "auth": { "breaker": { "failure_threshold": 2 } } }
//!     }"#,
//! )?;
//!
//! assert_eq!(config.timeout_secs, 5);
//! assert_eq!(config.retry.max_attempts, 4);
//! assert_eq!(config.discovery.project, "shopsmart");
//! # Ok::<(), relay::config::ConfigError>(())
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use bulwark::{BreakerOptions, PolicyError, RetryPolicy};
use faultline::ErrorKind;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use waypoint::{ResolverOptions, StaticEndpoints};

const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Failures loading or validating a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The document is not valid JSON or does not match the schema.
    #[error("malformed client configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable holds a value of the wrong type.
    #[error("environment variable {name} has invalid value '{value}'")]
    Env {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// A retry or breaker policy could not be built.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// One or more settings are out of range. Every problem found is listed.
    #[error("invalid client configuration: {}", problems.join("; "))]
    Invalid {
        /// One entry per invalid setting.
        problems: Vec<String>,
    },
}

/// Settings of a [`ResilientClient`][crate::ResilientClient].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Sent as `user-agent` on every request.
    pub user_agent: String,

    /// Timeout of each attempt, in seconds.
    pub timeout_secs: u64,

    /// Retry settings for dependencies without an override.
    pub retry: RetryConfig,

    /// Breaker settings for dependencies without an override.
    pub breaker: BreakerConfig,

    /// Per-dependency overrides, keyed by service name.
    pub dependencies: BTreeMap<String, DependencyConfig>,

    /// Registry discovery.
    pub discovery: DiscoveryConfig,

    /// Static base URLs, keyed by service name.
    pub endpoints: BTreeMap<String, String>,

    /// Whether `<SERVICE>_SERVICE_URL` environment variables are consulted after
    /// [`endpoints`][Self::endpoints].
    pub endpoints_from_env: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout_secs: 30,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            dependencies: BTreeMap::new(),
            discovery: DiscoveryConfig::default(),
            endpoints: BTreeMap::new(),
            endpoints_from_env: true,
        }
    }
}

/// Retry settings. See [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of any delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor of consecutive delays.
    pub backoff_multiplier: f64,
    /// Whether delays are randomized.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            base_delay_ms: duration_ms(policy.base_delay()),
            max_delay_ms: duration_ms(policy.max_delay()),
            backoff_multiplier: policy.backoff_multiplier(),
            jitter: policy.jitter(),
        }
    }
}

impl RetryConfig {
    /// Builds the validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the settings are out of range.
    pub fn to_policy(&self) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .jitter(self.jitter)
            .build()
    }
}

/// Circuit breaker settings. See [`BreakerOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive counted failures that open the breaker.
    pub failure_threshold: u32,
    /// Cooldown before a trial call, in seconds.
    pub recovery_timeout_secs: u64,
    /// Whether rate limiting counts as a failure.
    pub count_rate_limited: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        let options = BreakerOptions::default();
        Self {
            failure_threshold: options.threshold(),
            recovery_timeout_secs: options.timeout().as_secs(),
            count_rate_limited: options.counts(ErrorKind::RateLimited),
        }
    }
}

impl BreakerConfig {
    /// Builds the validated options.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the settings are out of range.
    pub fn to_options(&self) -> Result<BreakerOptions, PolicyError> {
        let mut options = BreakerOptions::default()
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(Duration::from_secs(self.recovery_timeout_secs));

        if self.count_rate_limited {
            options = options.count(ErrorKind::RateLimited);
        }

        options.validate()?;
        Ok(options)
    }
}

/// Overrides for one dependency. Missing sections use the client-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencyConfig {
    /// Retry settings of this dependency.
    pub retry: Option<RetryConfig>,
    /// Breaker settings of this dependency.
    pub breaker: Option<BreakerConfig>,
}

/// Registry discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Whether the registry is read at all.
    pub enabled: bool,
    /// Project segment of the registry prefix.
    pub project: String,
    /// Environment segment of the registry prefix.
    pub environment: String,
    /// How long a registry snapshot is served, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project: "shopsmart".to_owned(),
            environment: "production".to_owned(),
            cache_ttl_secs: 300,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and [`ConfigError::Invalid`] for
    /// out-of-range settings.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the deployment environment variables over the defaults and validates the
    /// result.
    ///
    /// | Variable | Setting |
    /// |---|---|
    /// | `PROJECT_NAME` | `discovery.project` |
    /// | `DEPLOYMENT_ENVIRONMENT` | `discovery.environment` |
    /// | `USE_SERVICE_DISCOVERY` | `discovery.enabled` |
    /// | `SERVICE_CACHE_TTL` | `discovery.cache_ttl_secs` |
    /// | `HTTP_TIMEOUT` | `timeout_secs` |
    /// | `HTTP_RETRIES` | `retry.max_attempts`, as retries after the first attempt |
    ///
    /// Fallback URLs are read from `<SERVICE>_SERVICE_URL` on each resolution.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for unparsable values and [`ConfigError::Invalid`] for
    /// out-of-range settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`][Self::from_env], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_env`][Self::from_env].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(project) = lookup("PROJECT_NAME") {
            config.discovery.project = project;
        }
        if let Some(environment) = lookup("DEPLOYMENT_ENVIRONMENT") {
            config.discovery.environment = environment;
        }
        if let Some(enabled) = lookup("USE_SERVICE_DISCOVERY") {
            config.discovery.enabled = parse_flag("USE_SERVICE_DISCOVERY", &enabled)?;
        }
        if let Some(ttl) = lookup("SERVICE_CACHE_TTL") {
            config.discovery.cache_ttl_secs = parse_number("SERVICE_CACHE_TTL", &ttl)?;
        }
        if let Some(timeout) = lookup("HTTP_TIMEOUT") {
            config.timeout_secs = parse_number("HTTP_TIMEOUT", &timeout)?;
        }
        if let Some(retries) = lookup("HTTP_RETRIES") {
            let retries: u32 = parse_number("HTTP_RETRIES", &retries)?;
            config.retry.max_attempts = retries.saturating_add(1);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks every setting and reports all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing each invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.user_agent.trim().is_empty() || HeaderValue::from_str(&self.user_agent).is_err() {
            problems.push(format!("user_agent: '{}' is not a valid header value", self.user_agent));
        }
        if self.timeout_secs == 0 {
            problems.push("timeout_secs: must be greater than zero".to_owned());
        }
        if let Err(e) = self.retry.to_policy() {
            problems.push(format!("retry: {e}"));
        }
        if let Err(e) = self.breaker.to_options() {
            problems.push(format!("breaker: {e}"));
        }

        for (name, dependency) in &self.dependencies {
            if let Some(Err(e)) = dependency.retry.as_ref().map(RetryConfig::to_policy) {
                problems.push(format!("dependencies.{name}.retry: {e}"));
            }
            if let Some(Err(e)) = dependency.breaker.as_ref().map(BreakerConfig::to_options) {
                problems.push(format!("dependencies.{name}.breaker: {e}"));
            }
        }

        if self.discovery.enabled {
            if self.discovery.project.trim().is_empty() {
                problems.push("discovery.project: must not be empty".to_owned());
            }
            if self.discovery.environment.trim().is_empty() {
                problems.push("discovery.environment: must not be empty".to_owned());
            }
        }

        for (name, url) in &self.endpoints {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push(format!("endpoints.{name}: '{url}' is not an http(s) URL"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolver settings.
    #[must_use]
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions::new(&self.discovery.project, &self.discovery.environment)
            .ttl(Duration::from_secs(self.discovery.cache_ttl_secs))
            .discovery(self.discovery.enabled)
    }

    /// Static fallbacks: configured URLs first, then environment variables if enabled.
    #[must_use]
    pub fn static_endpoints(&self) -> StaticEndpoints {
        let base = if self.endpoints_from_env {
            StaticEndpoints::from_env()
        } else {
            StaticEndpoints::none()
        };

        self.endpoints
            .iter()
            .fold(base, |endpoints, (service, url)| endpoints.with(service.clone(), url.clone()))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            name,
            value: value.to_owned(),
        }),
    }
}

fn parse_number<N: std::str::FromStr>(name: &'static str, value: &str) -> Result<N, ConfigError> {
    value.trim().parse().ok().ok_or_else(|| ConfigError::Env {
        name,
        value: value.to_owned(),
    })
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn env(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| vars.iter().find(|(key, _)| *key == name).map(|(_, value)| (*value).to_owned())
    }

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();

        config.validate().unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout_secs, 60);
        assert_eq!(config.resolver_options().prefix(), "/shopsmart/production/services");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClientConfig::from_json(r#"{ "retry": { "jitter": false }, "endpoints": { "auth": "http://auth" } }"#).unwrap();

        assert!(!config.retry.jitter);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.endpoints["auth"], "http://auth");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = ClientConfig::from_json(r#"{ "retries": 3 }"#).unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn every_problem_is_reported() {
        let mut config = ClientConfig::default();
        config.timeout_secs = 0;
        config.retry.max_attempts = 0;
        config.breaker.failure_threshold = 0;
        config.discovery.project = String::new();
        config.endpoints.insert("auth".to_owned(), "auth:8000".to_owned());
        config.dependencies.insert(
            "inventory".to_owned(),
            DependencyConfig {
                retry: Some(RetryConfig {
                    backoff_multiplier: 0.5,
                    ..RetryConfig::default()
                }),
                breaker: None,
            },
        );

        let ConfigError::Invalid { problems } = config.validate().unwrap_err() else {
            panic!("expected validation problems");
        };

        assert_eq!(problems.len(), 6, "{problems:?}");
        assert!(problems.iter().any(|p| p.starts_with("timeout_secs")));
        assert!(problems.iter().any(|p| p.starts_with("retry:")));
        assert!(problems.iter().any(|p| p.starts_with("breaker:")));
        assert!(problems.iter().any(|p| p.starts_with("dependencies.inventory.retry")));
        assert!(problems.iter().any(|p| p.starts_with("discovery.project")));
        assert!(problems.iter().any(|p| p.starts_with("endpoints.auth")));
    }

    #[test]
    fn reads_deployment_environment() {
        let config = ClientConfig::from_lookup(env(&[
            ("PROJECT_NAME", "shop"),
            ("DEPLOYMENT_ENVIRONMENT", "staging"),
            ("USE_SERVICE_DISCOVERY", "false"),
            ("SERVICE_CACHE_TTL", "60"),
            ("HTTP_TIMEOUT", "5"),
            ("HTTP_RETRIES", "2"),
        ]))
        .unwrap();

        assert_eq!(config.discovery.project, "shop");
        assert_eq!(config.discovery.environment, "staging");
        assert!(!config.discovery.enabled);
        assert_eq!(config.discovery.cache_ttl_secs, 60);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.resolver_options().prefix(), "/shop/staging/services");
    }

    #[test]
    fn unparsable_environment_values_are_named() {
        let error = ClientConfig::from_lookup(env(&[("HTTP_TIMEOUT", "soon")])).unwrap_err();
        assert_eq!(error.to_string(), "environment variable HTTP_TIMEOUT has invalid value 'soon'");

        let error = ClientConfig::from_lookup(env(&[("USE_SERVICE_DISCOVERY", "maybe")])).unwrap_err();
        assert!(matches!(error, ConfigError::Env { name: "USE_SERVICE_DISCOVERY", .. }));
    }

    #[test]
    fn overrides_build_policies() {
        let config = ClientConfig::from_json(
            r#"{ "dependencies": { "auth": { "retry": { "max_attempts": 1 }, "breaker": { "count_rate_limited": true } } } }"#,
        )
        .unwrap();
        let auth = &config.dependencies["auth"];

        assert_eq!(auth.retry.as_ref().unwrap().to_policy().unwrap().max_attempts(), 1);
        assert!(auth.breaker.as_ref().unwrap().to_options().unwrap().counts(ErrorKind::RateLimited));
    }

    #[test]
    fn configured_endpoints_take_precedence() {
        let mut config = ClientConfig {
            endpoints_from_env: false,
            ..ClientConfig::default()
        };
        config.endpoints.insert("auth".to_owned(), "http://auth.internal/".to_owned());

        let endpoints = config.static_endpoints();

        assert_eq!(endpoints.get("auth").as_deref(), Some("http://auth.internal"));
        assert_eq!(endpoints.get("inventory"), None);
    }
}
