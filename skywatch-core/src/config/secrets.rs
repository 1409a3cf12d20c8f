//! Secret handling and redaction
//!
//! Credentials are wrapped in [`SecretString`] so they never show up in
//! `Debug`/`Display` output, and URLs carrying a credential in their query
//! string are passed through [`redact_url`] before being logged.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const REDACTED: &str = "[REDACTED]";

/// Field name fragments treated as sensitive
const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "apikey",
    "key",
    "secret",
    "token",
    "password",
    "credential",
    "auth",
];

/// A wrapper type for sensitive strings like API keys
#[derive(Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Create a new secret string
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the actual value (use with caution)
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    /// Check if the secret is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Check if a field or parameter name looks like it holds a secret
pub fn is_sensitive_field(field_name: &str) -> bool {
    let lower = field_name.to_lowercase();
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Redact a value if its field name looks sensitive
pub fn redact_by_field_name(field_name: &str, value: &str) -> String {
    if is_sensitive_field(field_name) {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

/// Render a URL with sensitive query parameter values replaced
pub fn redact_url(url: &Url) -> String {
    redact_url_params(url, &[])
}

/// Like [`redact_url`], additionally hiding the values of `secret_params`
/// whatever their names look like
pub fn redact_url_params(url: &Url, secret_params: &[&str]) -> String {
    if url.query().is_none() {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            let value = if secret_params.iter().any(|secret| *secret == name) {
                REDACTED.to_string()
            } else {
                redact_by_field_name(&name, &value)
            };
            (name.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redaction() {
        let secret = SecretString::new("abcdef1234567890");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
    }

    #[test]
    fn test_secret_string_expose() {
        let secret = SecretString::new("my-secret-value");
        assert_eq!(secret.expose_secret(), "my-secret-value");
    }

    #[test]
    fn test_redact_by_field_name() {
        assert_eq!(redact_by_field_name("api_key", "DEMO_KEY"), "[REDACTED]");
        assert_eq!(redact_by_field_name("X-Auth-Token", "t"), "[REDACTED]");
        assert_eq!(redact_by_field_name("minmagnitude", "4.5"), "4.5");
    }

    #[test]
    fn test_redact_url() {
        let url = Url::parse("https://api.nasa.gov/neo/rest/v1/feed?start_date=2024-01-01&api_key=s3cret").unwrap();
        let rendered = redact_url(&url);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("start_date=2024-01-01"));

        let plain = Url::parse("https://services.swpc.noaa.gov/products/alerts.json").unwrap();
        assert_eq!(redact_url(&plain), plain.as_str());
    }

    #[test]
    fn test_redact_named_param() {
        let url = Url::parse("https://api.example.org/v1/data?k=hunter2&page=3").unwrap();
        assert!(redact_url(&url).contains("hunter2"));

        let rendered = redact_url_params(&url, &["k"]);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("page=3"));
    }
}
