// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Resilient calls from one service to another.
//!
//! [`ResilientClient`] ties the pieces of the outbound call path together:
//!
//! 1. the target service's URL is resolved by a [`waypoint::EndpointResolver`],
//! 2. the call passes through that dependency's [`bulwark::CircuitBreaker`],
//! 3. inside the breaker, a [`bulwark::RetryPolicy`] re-invokes the operation on transient
//!    failures,
//! 4. failures surface as [`faultline::ServiceError`] values carrying the service name and
//!    the caller's [`CorrelationContext`].
//!
//! Operations can be arbitrary async closures ([`ResilientClient::call`]) or HTTP requests
//! sent through a [`Transport`] ([`ResilientClient::send`]). The default transport is
//! [`HttpTransport`], backed by `reqwest`.
//!
//! Settings are loaded through [`config::ClientConfig`].

mod client;
pub mod config;
mod correlation;
mod transport;

pub use client::{CallTarget, OutboundRequest, OutboundResponse, ResilientClient};
pub use correlation::{CORRELATION_HEADER, CorrelationContext};
pub use transport::{HttpTransport, Transport};
