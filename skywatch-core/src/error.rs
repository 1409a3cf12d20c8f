//! Error taxonomy surfaced by the client core
//!
//! Every failure handed back to a caller is one of the kinds below; raw
//! transport errors are mapped at the HTTP boundary and never escape.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse classification of a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Auth,
    RateLimitExceeded,
    TransientNetwork,
    CircuitOpen,
}

/// Where a rate limit was enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitOrigin {
    /// Our own hourly/daily budget ran out; no network attempt was made
    Local,
    /// The provider answered with HTTP 429
    Provider,
}

/// Errors returned by [`crate::SkywatchClient`] and its components
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Unknown provider/operation or an unusable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed request parameters (locally detected or rejected upstream)
    #[error("Invalid request: {message}")]
    Validation {
        message: String,
        status: Option<u16>,
    },

    /// Credential rejected by the provider
    #[error("Credential rejected by {provider} (HTTP {status})")]
    Auth { provider: String, status: u16 },

    /// Local budget exhausted or provider-signaled throttling
    #[error("Rate limit exceeded for {provider} ({origin:?}){}", retry_note(.retries))]
    RateLimitExceeded {
        provider: String,
        origin: LimitOrigin,
        retry_after: Option<Duration>,
        retries: u32,
    },

    /// Timeout, connection failure or 5xx
    #[error("Transient network error from {provider}: {message}{}", retry_note(.retries))]
    TransientNetwork {
        provider: String,
        message: String,
        status: Option<u16>,
        retries: u32,
    },

    /// Provider is suspended by its circuit breaker
    #[error("Circuit open for {provider}, retry in {retry_after:?}")]
    CircuitOpen {
        provider: String,
        retry_after: Duration,
    },
}

fn retry_note(retries: &u32) -> String {
    match retries {
        0 => String::new(),
        1 => " after 1 retry".to_string(),
        n => format!(" after {} retries", n),
    }
}

impl ClientError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status: None,
        }
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            provider: provider.into(),
            message: message.into(),
            status: None,
            retries: 0,
        }
    }

    /// Local budget exhaustion, reported before any network attempt
    pub fn local_rate_limit(provider: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimitExceeded {
            provider: provider.into(),
            origin: LimitOrigin::Local,
            retry_after: Some(retry_after),
            retries: 0,
        }
    }

    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
        }
    }

    /// Whether the retry executor may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::TransientNetwork { .. }
        )
    }

    /// Whether this outcome counts against the provider's circuit breaker
    pub fn is_provider_failure(&self) -> bool {
        match self {
            Self::TransientNetwork { .. } => true,
            Self::RateLimitExceeded { origin, .. } => *origin == LimitOrigin::Provider,
            _ => false,
        }
    }

    /// Whether the attempt that produced this error was received by the provider
    pub fn reached_provider(&self) -> bool {
        match self {
            Self::Auth { .. } => true,
            Self::Validation { status, .. } | Self::TransientNetwork { status, .. } => {
                status.is_some()
            }
            Self::RateLimitExceeded { origin, .. } => *origin == LimitOrigin::Provider,
            Self::Configuration { .. } | Self::CircuitOpen { .. } => false,
        }
    }

    /// Suggested wait before the same call can succeed
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => *retry_after,
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Number of retries performed before this error was surfaced
    pub fn retries(&self) -> u32 {
        match self {
            Self::RateLimitExceeded { retries, .. } | Self::TransientNetwork { retries, .. } => {
                *retries
            }
            _ => 0,
        }
    }

    /// Attach the retry count for diagnostics
    pub fn with_retries(mut self, count: u32) -> Self {
        if let Self::RateLimitExceeded { retries, .. } | Self::TransientNetwork { retries, .. } =
            &mut self
        {
            *retries = count;
        }
        self
    }
}

impl From<crate::config::ConfigError> for ClientError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
