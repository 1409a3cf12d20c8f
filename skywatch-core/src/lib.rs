//! Skywatch Core Library
//!
//! This crate provides the resilient data-access layer of the Skywatch
//! dashboard: one client that fetches from public astronomy and geophysics
//! providers while caching responses, respecting each provider's rate limits,
//! retrying transient failures and isolating providers that keep failing.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod queue;
pub mod registry;
pub mod resilience;

pub use cache::{CacheStats, CacheStore, Params};
pub use client::{BatchRequest, ClientStats, ProviderStatus, SkywatchClient, SkywatchClientBuilder};
pub use config::SkywatchConfig;
pub use error::{ClientError, ClientResult, ErrorKind, LimitOrigin};
pub use http::{Payload, RequestOptions, Transport};
pub use registry::{EndpointDescriptor, EndpointRegistry};
pub use resilience::{CircuitState, RetryPolicy};

/// Returns the version of the Skywatch Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
