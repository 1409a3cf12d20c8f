//! Configuration module for Skywatch
//!
//! Providers, endpoints and resilience limits are loaded once at startup from
//! YAML or JSON. `${VAR}` and `${VAR:-default}` references are resolved from
//! the environment before parsing.

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::{interpolate_env_vars, referenced_env_vars};
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    BreakerConfig, CacheConfig, ConnectionConfig, CredentialConfig, CredentialPlacement,
    EndpointConfig, ProviderConfig, QueueConfig, RateLimitConfig, RetryConfig, SkywatchConfig,
    SCHEMA_VERSION,
};
pub use secrets::{
    is_sensitive_field, redact_by_field_name, redact_url, redact_url_params, SecretString,
};
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;
use tracing::debug;

/// Catalogue of the public providers the dashboard talks to
const BUILTIN_PROVIDERS: &str = include_str!("../../config/providers.yaml");

const INLINE_SOURCE: &str = "<inline>";

impl SkywatchConfig {
    /// The built-in provider catalogue, with environment overrides applied
    pub fn builtin() -> ConfigResult<Self> {
        from_yaml_str(BUILTIN_PROVIDERS)
    }
}

fn read_file(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

fn parse_yaml(content: &str, source: &str) -> ConfigResult<SkywatchConfig> {
    // Interpolate environment variables before parsing
    let interpolated = env::interpolate_env_vars(content)?;

    let config: SkywatchConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: source.to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    debug!("Loaded {} providers from {}", config.providers.len(), source);
    Ok(config)
}

fn parse_json(content: &str, source: &str) -> ConfigResult<SkywatchConfig> {
    let interpolated = env::interpolate_env_vars(content)?;

    let config: SkywatchConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: source.to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    debug!("Loaded {} providers from {}", config.providers.len(), source);
    Ok(config)
}

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<SkywatchConfig> {
    let path = path.as_ref();
    let content = read_file(path)?;
    parse_yaml(&content, &path.to_string_lossy())
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<SkywatchConfig> {
    let path = path.as_ref();
    let content = read_file(path)?;
    parse_json(&content, &path.to_string_lossy())
}

/// Parse and validate a YAML document held in memory
pub fn from_yaml_str(content: &str) -> ConfigResult<SkywatchConfig> {
    parse_yaml(content, INLINE_SOURCE)
}

/// Parse and validate a JSON document held in memory
pub fn from_json_str(content: &str) -> ConfigResult<SkywatchConfig> {
    parse_json(content, INLINE_SOURCE)
}
