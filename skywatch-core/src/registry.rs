//! Endpoint registry
//!
//! Maps `(provider, operation)` to an immutable [`EndpointDescriptor`] built
//! once from configuration. Descriptors also shape outgoing requests: path
//! placeholders are filled, the remaining parameters become the query string,
//! and the cache key is derived from the result.

use crate::cache::{compute_key, Params};
use crate::config::SkywatchConfig;
use crate::error::ClientError;
use std::collections::btree_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::{form_urlencoded, Url};

/// Names of the `{name}` placeholders in a URL template, in order of appearance
pub fn path_placeholders(template: &str) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(format!("Unmatched '}}' in '{}'", template));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("Unclosed '{{' in '{}'", template))?;
        let name = &after[..close];
        let well_formed = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !well_formed {
            return Err(format!("Invalid placeholder '{{{}}}' in '{}'", name, template));
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[close + 1..];
    }
    Ok(names)
}

/// Percent-encode a value for use inside one path segment
fn encode_path_value(value: &str) -> String {
    // Form encoding leaves a bare '+' only where the input had a space
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Substitute placeholder values into a URL template.
///
/// Values are percent-encoded; separators and dot segments are rejected.
pub fn fill_placeholders(template: &str, values: &Params) -> Result<String, String> {
    let mut filled = template.to_string();
    for name in path_placeholders(template)? {
        let value = values
            .get(&name)
            .ok_or_else(|| format!("Missing path parameter '{}'", name))?;
        let dot_segment = matches!(value.as_str(), "." | "..");
        if value.is_empty() || dot_segment || value.contains(['/', '\\', '?', '#']) {
            return Err(format!("Invalid value for path parameter '{}': '{}'", name, value));
        }
        filled = filled.replace(&format!("{{{}}}", name), &encode_path_value(value));
    }
    Ok(filled)
}

/// Static description of one provider operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub provider: String,
    pub operation: String,
    /// Base URL, possibly with `{name}` placeholders
    pub base_address: String,
    pub requires_credential: bool,
    pub default_ttl: Duration,
    placeholders: Vec<String>,
}

/// A request shaped by its descriptor, ready for caching and dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    /// Base address with placeholders filled
    pub address: String,
    /// Parameters sent in the query string
    pub query: Params,
    pub cache_key: String,
}

impl PreparedRequest {
    /// Final URL including the query string (credentials are added by the caller)
    pub fn url(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.address).map_err(|e| {
            ClientError::validation(format!("Invalid request address '{}': {}", self.address, e))
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }
}

impl EndpointDescriptor {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        base_address: impl Into<String>,
        requires_credential: bool,
        default_ttl: Duration,
    ) -> Result<Self, ClientError> {
        let base_address = base_address.into();
        let placeholders = path_placeholders(&base_address).map_err(ClientError::configuration)?;
        Ok(Self {
            provider: provider.into(),
            operation: operation.into(),
            base_address,
            requires_credential,
            default_ttl,
            placeholders,
        })
    }

    /// Placeholder names consumed from the request parameters
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Validate parameters and derive the address, query and cache key.
    ///
    /// Repeating a parameter with the same value is tolerated; repeating it
    /// with a different value is a validation error.
    pub fn prepare<I, K, V>(&self, params: I) -> Result<PreparedRequest, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut all = Params::new();
        for (name, value) in params {
            let name = name.into();
            let value = value.into();
            if name.trim().is_empty() {
                return Err(ClientError::validation("Parameter names must not be empty"));
            }
            match all.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(slot) if *slot.get() == value => {}
                Entry::Occupied(slot) => {
                    return Err(ClientError::validation(format!(
                        "Conflicting values for parameter '{}'",
                        slot.key()
                    )));
                }
            }
        }

        let address = fill_placeholders(&self.base_address, &all).map_err(ClientError::validation)?;
        let query: Params = all
            .into_iter()
            .filter(|(name, _)| !self.placeholders.contains(name))
            .collect();
        let cache_key = compute_key(&self.provider, &self.operation, &address, &query);

        Ok(PreparedRequest {
            address,
            query,
            cache_key,
        })
    }
}

/// Lookup table of every configured operation
#[derive(Debug, Default, Clone)]
pub struct EndpointRegistry {
    providers: HashMap<String, HashMap<String, Arc<EndpointDescriptor>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build descriptors for every endpoint in the configuration
    pub fn from_config(config: &SkywatchConfig) -> Result<Self, ClientError> {
        let mut registry = Self::new();
        for provider in &config.providers {
            let provider_ttl = provider.default_ttl();
            for endpoint in &provider.endpoints {
                registry.register(EndpointDescriptor::new(
                    &provider.name,
                    &endpoint.operation,
                    &endpoint.base_url,
                    endpoint.requires_credential,
                    endpoint.ttl(provider_ttl),
                )?)?;
            }
        }
        Ok(registry)
    }

    /// Add a descriptor; each (provider, operation) pair may appear once
    pub fn register(&mut self, descriptor: EndpointDescriptor) -> Result<(), ClientError> {
        let operations = self.providers.entry(descriptor.provider.clone()).or_default();
        if operations.contains_key(&descriptor.operation) {
            return Err(ClientError::configuration(format!(
                "Duplicate operation '{}' for provider '{}'",
                descriptor.operation, descriptor.provider
            )));
        }
        operations.insert(descriptor.operation.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Look up an operation; unknown names are a configuration error
    pub fn resolve(&self, provider: &str, operation: &str) -> Result<Arc<EndpointDescriptor>, ClientError> {
        let operations = self
            .providers
            .get(provider)
            .ok_or_else(|| ClientError::configuration(format!("Unknown provider '{}'", provider)))?;
        operations.get(operation).cloned().ok_or_else(|| {
            ClientError::configuration(format!(
                "Unknown operation '{}' for provider '{}'",
                operation, provider
            ))
        })
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Operations offered by a provider, sorted
    pub fn operations(&self, provider: &str) -> Vec<&str> {
        let mut ops: Vec<&str> = self
            .providers
            .get(provider)
            .map(|ops| ops.keys().map(String::as_str).collect())
            .unwrap_or_default();
        ops.sort_unstable();
        ops
    }

    pub fn len(&self) -> usize {
        self.providers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
