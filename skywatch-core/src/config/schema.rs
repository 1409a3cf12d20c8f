//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::SecretString;
use crate::resilience::{BreakerSettings, RateLimitSettings, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Schema version understood by this crate
pub const SCHEMA_VERSION: &str = "0.1";

/// Root configuration structure for Skywatch
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SkywatchConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Data providers and their endpoints
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Request queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Global connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// One data provider
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Unique provider name
    pub name: String,

    /// Cache lifetime for endpoints without their own `ttl_ms`
    #[serde(default = "default_ttl")]
    pub default_ttl_ms: u64,

    /// Static credential attached to endpoints that require one
    #[serde(default)]
    pub credential: Option<CredentialConfig>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: BreakerConfig,

    #[serde(default)]
    pub retry_policy: RetryConfig,

    /// Operations offered by this provider
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Where a credential is attached to outgoing requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialPlacement {
    /// Query string parameter
    #[default]
    Query,
    /// Request header
    Header,
}

/// Static API credential (supports environment variable interpolation)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    pub value: SecretString,

    #[serde(default)]
    pub placement: CredentialPlacement,

    /// Query parameter or header name
    #[serde(default = "default_credential_param")]
    pub param: String,

    /// Quota tier; each tier gets its own rate budget
    #[serde(default)]
    pub tier: Option<String>,
}

/// One operation exposed by a provider
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Operation name, unique within the provider
    pub operation: String,

    /// Base URL; may contain `{name}` path placeholders
    pub base_url: String,

    #[serde(default)]
    pub requires_credential: bool,

    /// Cache lifetime override for this operation
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

/// Pacing and quota ceilings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Minimum spacing between calls in milliseconds
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Calls per hour
    #[serde(default)]
    pub hourly_limit: Option<u32>,

    /// Calls per day
    #[serde(default)]
    pub daily_limit: Option<u32>,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for network and server failures in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Base delay for rate-limit failures in milliseconds
    #[serde(default = "default_rate_limit_base_delay")]
    pub rate_limit_base_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Add jitter to retry delays
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Honour provider Retry-After headers
    #[serde(default = "default_true")]
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            rate_limit_base_delay_ms: default_rate_limit_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: true,
            respect_retry_after: true,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of entries
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Background purge interval; 0 disables the sweeper
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// File used to keep cached responses across restarts
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            sweep_interval_ms: default_sweep_interval(),
            persist_path: None,
        }
    }
}

/// Request queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Simultaneous in-flight provider calls
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Maximum idle connections per host
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Keep-alive timeout in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            max_idle_per_host: default_max_idle(),
            keepalive_secs: default_keepalive(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool { true }
fn default_ttl() -> u64 { 300_000 }
fn default_credential_param() -> String { "api_key".to_string() }
fn default_failure_threshold() -> u32 { 5 }
fn default_cooldown() -> u64 { 60_000 }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay() -> u64 { 1000 }
fn default_rate_limit_base_delay() -> u64 { 5000 }
fn default_max_delay() -> u64 { 300_000 }
fn default_capacity() -> usize { 1024 }
fn default_sweep_interval() -> u64 { 60_000 }
fn default_max_concurrency() -> usize { 5 }
fn default_connect_timeout() -> u64 { 10_000 }
fn default_request_timeout() -> u64 { 30_000 }
fn default_max_idle() -> usize { 10 }
fn default_keepalive() -> u64 { 90 }

impl SkywatchConfig {
    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        // Validate version
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }

        if self.version != SCHEMA_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: SCHEMA_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        if self.providers.is_empty() {
            return Err(ValidationError::required("providers")
                .with_context("At least one provider must be configured"));
        }

        let mut seen_names = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if !seen_names.insert(&provider.name) {
                return Err(ValidationError::duplicate(
                    format!("providers[{}].name", i),
                    provider.name.clone(),
                ));
            }
            provider.validate(&format!("providers[{}]", i))?;
        }

        if self.cache.capacity == 0 {
            return Err(ValidationError::out_of_range(
                "cache.capacity",
                "Must be greater than 0",
            ));
        }

        if self.queue.max_concurrency == 0 {
            return Err(ValidationError::out_of_range(
                "queue.max_concurrency",
                "Must be greater than 0",
            ));
        }

        self.connection.validate("connection")
    }
}

impl ProviderConfig {
    /// Validate provider configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::required(format!("{}.name", path)));
        }

        // '#' separates provider and tier in rate budget keys
        if self.name.contains('#') {
            return Err(ValidationError::invalid_format(
                format!("{}.name", path),
                "Must not contain '#'",
            ));
        }

        if self.default_ttl_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.default_ttl_ms", path),
                "Must be greater than 0",
            ));
        }

        if let Some(credential) = &self.credential {
            credential.validate(&format!("{}.credential", path))?;
        }

        if self.endpoints.is_empty() {
            return Err(ValidationError::required(format!("{}.endpoints", path))
                .with_context("A provider needs at least one operation"));
        }

        let mut seen_operations = HashSet::new();
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let endpoint_path = format!("{}.endpoints[{}]", path, i);

            if !seen_operations.insert(&endpoint.operation) {
                return Err(ValidationError::duplicate(
                    format!("{}.operation", endpoint_path),
                    endpoint.operation.clone(),
                ));
            }

            endpoint.validate(&endpoint_path)?;

            if endpoint.requires_credential && self.credential.is_none() {
                return Err(ValidationError::required(format!("{}.credential", path))
                    .with_context(format!(
                        "Operation '{}' requires a credential",
                        endpoint.operation
                    )));
            }
        }

        self.rate_limit.validate(&format!("{}.rate_limit", path))?;
        self.circuit_breaker
            .validate(&format!("{}.circuit_breaker", path))?;
        self.retry_policy
            .validate(&format!("{}.retry_policy", path))?;

        Ok(())
    }

    /// Key under which this provider's rate budget is tracked
    pub fn budget_key(&self) -> String {
        match self.credential.as_ref().and_then(|c| c.tier.as_deref()) {
            Some(tier) => format!("{}#{}", self.name, tier),
            None => self.name.clone(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl CredentialConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.value.is_empty() {
            return Err(ValidationError::required(format!("{}.value", path)));
        }
        if self.param.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.param", path)));
        }
        if let Some(tier) = &self.tier {
            if tier.is_empty() {
                return Err(ValidationError::invalid_format(
                    format!("{}.tier", path),
                    "Must not be empty when set",
                ));
            }
        }
        Ok(())
    }
}

impl EndpointConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.operation.is_empty() {
            return Err(ValidationError::required(format!("{}.operation", path)));
        }

        if self.base_url.is_empty() {
            return Err(ValidationError::required(format!("{}.base_url", path)));
        }

        if let Some(0) = self.ttl_ms {
            return Err(ValidationError::out_of_range(
                format!("{}.ttl_ms", path),
                "Must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Cache lifetime for this operation given the provider default
    pub fn ttl(&self, provider_default: Duration) -> Duration {
        self.ttl_ms
            .map(Duration::from_millis)
            .unwrap_or(provider_default)
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if let (Some(hourly), Some(daily)) = (self.hourly_limit, self.daily_limit) {
            if hourly > daily {
                return Err(ValidationError::incompatible(
                    format!("{}.hourly_limit", path),
                    "Must be <= daily_limit",
                ));
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            min_interval: Duration::from_millis(self.min_interval_ms),
            hourly_limit: self.hourly_limit,
            daily_limit: self.daily_limit,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.failure_threshold", path),
                "Must be greater than 0",
            ));
        }
        if self.cooldown_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.cooldown_ms", path),
                "Must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

impl RetryConfig {
    /// Validate retry policy
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.base_delay_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.base_delay_ms", path),
                "Must be greater than 0",
            ));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(ValidationError::incompatible(
                format!("{}.max_delay_ms", path),
                "Must be >= base_delay_ms",
            ));
        }

        if self.rate_limit_base_delay_ms < self.base_delay_ms {
            return Err(ValidationError::incompatible(
                format!("{}.rate_limit_base_delay_ms", path),
                "Must be >= base_delay_ms",
            ));
        }

        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            rate_limit_base_delay: Duration::from_millis(self.rate_limit_base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: if self.jitter { 0.1 } else { 0.0 },
            respect_retry_after: self.respect_retry_after,
        }
    }
}

impl CacheConfig {
    /// Sweeper interval, `None` when disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

impl ConnectionConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.connect_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.connect_timeout_ms", path),
                "Must be greater than 0",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.request_timeout_ms", path),
                "Must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}
