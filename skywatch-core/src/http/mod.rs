//! HTTP layer for reaching data providers
//!
//! This module implements the network seam of Skywatch, handling:
//! - The [`Transport`] trait every provider call goes through
//! - Connection pooling via the reqwest-backed [`HttpTransport`]
//! - Status code mapping and retry hints
//! - Request ID generation and correlation

pub mod client;
pub mod error;

pub use client::HttpTransport;
pub use error::{map_http_error, parse_retry_after};

use crate::config::{redact_url, redact_url_params, SecretString};
use crate::error::ClientError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Opaque response body handed back to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// HTTP status of the successful response
    pub status: u16,

    /// Content-Type header, if the provider sent one
    pub content_type: Option<String>,

    /// Raw body text
    pub body: String,
}

impl Payload {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Whether the provider labelled the body as JSON
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// A single network attempt, fully resolved
#[derive(Clone)]
pub struct OutboundRequest {
    /// Correlation id, shared by every attempt of one logical call
    pub request_id: Uuid,

    /// Provider name, used for error attribution
    pub provider: String,

    /// Final URL including query string and any credential parameter
    pub url: Url,

    /// Extra headers (credentials placed in a header land here)
    pub headers: Vec<(String, SecretString)>,

    /// Deadline for this attempt
    pub timeout: Duration,

    /// Query parameter carrying the credential, hidden whenever the URL is logged
    pub secret_param: Option<String>,
}

impl OutboundRequest {
    /// URL safe to log: the credential parameter and sensitive-looking names are masked
    pub fn redacted_url(&self) -> String {
        match &self.secret_param {
            Some(param) => redact_url_params(&self.url, &[param.as_str()]),
            None => redact_url(&self.url),
        }
    }
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("request_id", &self.request_id)
            .field("provider", &self.provider)
            .field("url", &self.redacted_url())
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Per-call options accepted by the client facade
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Bypass a cached value and fetch again
    pub force_refresh: bool,

    /// Cache lifetime for this response instead of the endpoint default
    pub ttl: Option<Duration>,

    /// Per-attempt timeout instead of the configured one
    pub timeout: Option<Duration>,

    /// Unique request ID for correlation
    pub request_id: Uuid,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            ttl: None,
            timeout: None,
            request_id: Uuid::new_v4(),
        }
    }
}

impl RequestOptions {
    /// Create new request options with a generated request ID
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the cache lookup (the response is still cached)
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the timeout for each attempt of this request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Performs one network attempt.
///
/// Implementations must map every failure into the [`ClientError`] taxonomy;
/// nothing transport-specific may escape.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<Payload, ClientError>;
}
