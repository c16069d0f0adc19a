// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Resolves logical service names to URLs.
//!
//! Services register their properties in a key/value [`Registry`] under
//! `/<project>/<environment>/services/<service>/<property>`. The [`EndpointResolver`]
//! reads every key under that prefix in one call, keeps the result as an immutable
//! [`ServiceTable`] for a configurable TTL and falls back to [`StaticEndpoints`] for
//! services the registry does not know.
//!
//! Registry failures never fail a resolution: the previous snapshot keeps serving, stale,
//! until a later refresh succeeds. Concurrent callers that find the snapshot expired share
//! a single registry read.
//!
//! | Property | Meaning |
//! |---|---|
//! | `full_url` | Base URL of the service. |
//! | `health_endpoint` | Health path (default `/health`) or an absolute URL. |
//!
//! ```
//! # futures::executor::block_on(async {
//! use waypoint::{EndpointResolver, EndpointSource, InMemoryRegistry, ResolverOptions, StaticEndpoints};
//!
//! let resolver = EndpointResolver::new(
//!     InMemoryRegistry::new(),
//!     ResolverOptions::new("shopsmart", "production"),
//!     StaticEndpoints::none().with("auth", "http://auth.local:8000"),
//! );
//!
//! let health = resolver.resolve_health_endpoint("auth").await.unwrap();
//! assert_eq!(health.url, "http://auth.local:8000/health");
//! assert_eq!(health.source, EndpointSource::Fallback);
//! # });
//! ```

mod fallback;
mod registry;
mod resolver;
mod table;

pub use fallback::{StaticEndpoints, env_var_name};
pub use registry::{BoxError, InMemoryRegistry, Registry, RegistryEntry, RegistryError};
pub use resolver::{Endpoint, EndpointResolver, EndpointSource, ResolverOptions, registry_prefix};
pub use table::{DEFAULT_HEALTH_PATH, FULL_URL, HEALTH_ENDPOINT, ServiceRecord, ServiceTable};
