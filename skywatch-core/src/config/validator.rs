//! Configuration validation utilities

use super::error::ValidationError;
use super::schema::{CredentialPlacement, ProviderConfig, SkywatchConfig};
use super::secrets::is_sensitive_field;
use crate::registry::{fill_placeholders, path_placeholders};
use std::collections::BTreeMap;
use tracing::warn;

/// Configuration validator with additional validation rules
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Reject configs that would fall back to a shared demo credential
    deny_demo_credentials: bool,
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat the shared `DEMO_KEY` credential as an error instead of a warning
    pub fn deny_demo_credentials(mut self, deny: bool) -> Self {
        self.deny_demo_credentials = deny;
        self
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &SkywatchConfig) -> Result<(), ValidationError> {
        // First run the built-in validation
        config.validate()?;

        for (i, provider) in config.providers.iter().enumerate() {
            let path = format!("providers[{}]", i);
            self.validate_endpoints(provider, &path)?;
            self.validate_credential(provider, &path)?;
        }

        Ok(())
    }

    /// Validate endpoint URLs and their path placeholders
    fn validate_endpoints(&self, provider: &ProviderConfig, path: &str) -> Result<(), ValidationError> {
        for (i, endpoint) in provider.endpoints.iter().enumerate() {
            let field = format!("{}.endpoints[{}].base_url", path, i);

            let names = path_placeholders(&endpoint.base_url)
                .map_err(|message| ValidationError::invalid_format(&field, message))?;

            // Substitute dummy values so the URL parser sees a concrete address
            let dummy: BTreeMap<String, String> =
                names.iter().map(|name| (name.clone(), "x".to_string())).collect();
            let concrete = fill_placeholders(&endpoint.base_url, &dummy)
                .map_err(|message| ValidationError::invalid_format(&field, message))?;

            match url::Url::parse(&concrete) {
                Ok(url) => {
                    if url.scheme() != "http" && url.scheme() != "https" {
                        return Err(ValidationError::invalid_url(
                            &field,
                            format!("URL scheme must be http or https, got: {}", url.scheme()),
                        ));
                    }
                    if url.query().is_some() {
                        return Err(ValidationError::invalid_url(
                            &field,
                            "Base URL must not carry a query string",
                        ));
                    }
                }
                Err(e) => return Err(ValidationError::invalid_url(&field, e.to_string())),
            }

            if let Some(credential) = &provider.credential {
                if credential.placement == CredentialPlacement::Query
                    && names.iter().any(|name| name == &credential.param)
                {
                    return Err(ValidationError::incompatible(
                        &field,
                        format!("Placeholder '{}' collides with the credential parameter", credential.param),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_credential(&self, provider: &ProviderConfig, path: &str) -> Result<(), ValidationError> {
        let Some(credential) = &provider.credential else {
            return Ok(());
        };

        if credential.value.expose_secret() == "DEMO_KEY" {
            if self.deny_demo_credentials {
                return Err(ValidationError::invalid_value(
                    format!("{}.credential.value", path),
                    "a personal API key",
                    "DEMO_KEY",
                ));
            }
            warn!(
                "Provider '{}' uses the shared DEMO_KEY credential; quotas will be tight",
                provider.name
            );
        }

        if credential.placement == CredentialPlacement::Header && !is_sensitive_field(&credential.param) {
            warn!(
                "Credential header '{}' for provider '{}' will not be redacted in logs",
                credential.param, provider.name
            );
        }

        Ok(())
    }
}
