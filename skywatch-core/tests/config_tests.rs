//! Integration tests for configuration loading and validation

use skywatch_core::config::{
    load_from_json, load_from_yaml, ConfigError, CredentialPlacement, SkywatchConfig,
    ValidationErrorKind,
};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Helper to create a test config file
fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_valid_yaml_config() {
    use std::env;
    env::set_var("SKYWATCH_TEST_NASA_KEY", "test-key");

    let yaml = r#"
version: "0.1"
providers:
  - name: nasa
    default_ttl_ms: 3600000
    credential:
      value: ${SKYWATCH_TEST_NASA_KEY}
      tier: ${SKYWATCH_TEST_NASA_TIER:-personal}
    rate_limit:
      hourly_limit: 1000
      daily_limit: 24000
    endpoints:
      - operation: neo_lookup
        base_url: https://api.nasa.gov/neo/rest/v1/neo/{asteroid_id}
        requires_credential: true
      - operation: apod
        base_url: https://api.nasa.gov/planetary/apod
        requires_credential: true
        ttl_ms: 1800000
queue:
  max_concurrency: 3
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_file(&temp_dir, "config.yaml", yaml);

    let config = load_from_yaml(&config_path).unwrap();
    let nasa = config.provider("nasa").unwrap();
    let credential = nasa.credential.as_ref().unwrap();
    assert_eq!(credential.value.expose_secret(), "test-key");
    assert_eq!(credential.placement, CredentialPlacement::Query);
    assert_eq!(credential.param, "api_key");
    assert_eq!(nasa.budget_key(), "nasa#personal");
    assert_eq!(nasa.endpoints[1].ttl(nasa.default_ttl()), Duration::from_secs(1800));
    assert_eq!(config.queue.max_concurrency, 3);
}

#[test]
fn test_load_valid_json_config() {
    let json = r#"{
  "version": "0.1",
  "providers": [
    {
      "name": "usgs",
      "rate_limit": { "min_interval_ms": 100 },
      "circuit_breaker": { "failure_threshold": 3, "cooldown_ms": 30000 },
      "endpoints": [
        { "operation": "earthquakes", "base_url": "https://earthquake.usgs.gov/fdsnws/event/1/query", "ttl_ms": 600000 }
      ]
    }
  ]
}"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_file(&temp_dir, "config.json", json);

    let config = load_from_json(&config_path).unwrap();
    let usgs = config.provider("usgs").unwrap();
    assert_eq!(usgs.rate_limit.settings().min_interval, Duration::from_millis(100));
    assert_eq!(usgs.circuit_breaker.settings().failure_threshold, 3);
    assert_eq!(usgs.budget_key(), "usgs");
}

#[test]
fn test_missing_env_var() {
    let yaml = r#"
version: "0.1"
providers:
  - name: nasa
    credential:
      value: ${SKYWATCH_TEST_SURELY_UNSET_VAR}
    endpoints:
      - operation: apod
        base_url: https://api.nasa.gov/planetary/apod
        requires_credential: true
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_file(&temp_dir, "config.yaml", yaml);

    match load_from_yaml(&config_path) {
        Err(ConfigError::EnvVarNotFound { var }) => {
            assert_eq!(var, "SKYWATCH_TEST_SURELY_UNSET_VAR");
        }
        other => panic!("Expected EnvVarNotFound, got {:?}", other),
    }
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = load_from_yaml(temp_dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::IoError { .. })));
}

#[test]
fn test_credential_required_by_endpoint() {
    let yaml = r#"
version: "0.1"
providers:
  - name: nasa
    endpoints:
      - operation: apod
        base_url: https://api.nasa.gov/planetary/apod
        requires_credential: true
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_file(&temp_dir, "config.yaml", yaml);

    match load_from_yaml(&config_path) {
        Err(ConfigError::ValidationError(err)) => {
            assert!(err.field_path.starts_with("providers[0]"));
        }
        other => panic!("Expected ValidationError, got {:?}", other),
    }
}

#[test]
fn test_hourly_limit_above_daily_rejected() {
    let yaml = r#"
version: "0.1"
providers:
  - name: nasa
    rate_limit: { hourly_limit: 100, daily_limit: 50 }
    endpoints:
      - operation: apod
        base_url: https://api.nasa.gov/planetary/apod
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_file(&temp_dir, "config.yaml", yaml);

    match load_from_yaml(&config_path) {
        Err(ConfigError::ValidationError(err)) => {
            assert!(err.field_path.contains("rate_limit"));
        }
        other => panic!("Expected ValidationError, got {:?}", other),
    }
}

#[test]
fn test_duplicate_provider_rejected() {
    let yaml = r#"
version: "0.1"
providers:
  - name: usgs
    endpoints:
      - operation: earthquakes
        base_url: https://earthquake.usgs.gov/fdsnws/event/1/query
  - name: usgs
    endpoints:
      - operation: elevation
        base_url: https://epqs.nationalmap.gov/v1/json
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_file(&temp_dir, "config.yaml", yaml);

    match load_from_yaml(&config_path) {
        Err(ConfigError::ValidationError(err)) => {
            assert!(matches!(err.kind, ValidationErrorKind::DuplicateValue { .. }));
        }
        other => panic!("Expected ValidationError, got {:?}", other),
    }
}

#[test]
fn test_malformed_placeholder_rejected() {
    let yaml = r#"
version: "0.1"
providers:
  - name: celestrak
    endpoints:
      - operation: elements
        base_url: https://celestrak.org/NORAD/elements/{group.txt
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_file(&temp_dir, "config.yaml", yaml);
    assert!(matches!(
        load_from_yaml(&config_path),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn test_builtin_catalogue_is_valid() {
    let config = SkywatchConfig::builtin().unwrap();
    assert_eq!(config.providers.len(), 6);
    for provider in &config.providers {
        assert!(!provider.endpoints.is_empty(), "{} has no endpoints", provider.name);
    }
    let celestrak = config.provider("celestrak").unwrap();
    assert_eq!(
        celestrak.rate_limit.settings().min_interval,
        Duration::from_secs(1)
    );
}
