//! Environment variable interpolation for configuration

use super::error::ConfigError;
use regex::{Captures, Regex};
use std::env;

/// `${VAR}` or `${VAR:-default}`
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}";

pub(crate) fn env_var_regex() -> Result<Regex, ConfigError> {
    Regex::new(ENV_VAR_PATTERN).map_err(|e| ConfigError::Invalid {
        message: format!("bad interpolation pattern: {}", e),
    })
}

/// Interpolate environment variables in a configuration string.
///
/// An unset variable without a default is an error; an empty default
/// (`${VAR:-}`) yields an empty string.
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    interpolate_with(content, |name| env::var(name).ok())
}

fn interpolate_with(
    content: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let pattern = env_var_regex()?;
    let mut missing: Option<String> = None;

    let result = pattern.replace_all(content, |cap: &Captures<'_>| {
        let var_name = &cap[1];
        match (lookup(var_name), cap.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    // Report the first missing variable
    if let Some(var) = missing {
        return Err(ConfigError::EnvVarNotFound { var });
    }

    Ok(result.into_owned())
}

/// Names of all variables referenced by `text`
pub fn referenced_env_vars(text: &str) -> Result<Vec<String>, ConfigError> {
    Ok(env_var_regex()?
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_interpolate_env_vars() {
        let result = interpolate_with("value: ${NASA_API_KEY}", lookup(&[("NASA_API_KEY", "abc")]));
        assert_eq!(result.unwrap(), "value: abc");
    }

    #[test]
    fn test_default_used_when_unset() {
        let result = interpolate_with("value: ${NASA_API_KEY:-DEMO_KEY}", lookup(&[]));
        assert_eq!(result.unwrap(), "value: DEMO_KEY");

        let result = interpolate_with("value: ${NASA_API_KEY:-DEMO_KEY}", lookup(&[("NASA_API_KEY", "mine")]));
        assert_eq!(result.unwrap(), "value: mine");

        let result = interpolate_with("value: '${EMPTY:-}'", lookup(&[]));
        assert_eq!(result.unwrap(), "value: ''");
    }

    #[test]
    fn test_missing_env_var() {
        let result = interpolate_with("a: ${FIRST_MISSING}, b: ${SECOND_MISSING}", lookup(&[]));
        match result {
            Err(ConfigError::EnvVarNotFound { var }) => assert_eq!(var, "FIRST_MISSING"),
            other => panic!("Expected EnvVarNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_env_vars() {
        let result = interpolate_with(
            "key1: ${VAR1}, key2: ${VAR2}",
            lookup(&[("VAR1", "value1"), ("VAR2", "value2")]),
        );
        assert_eq!(result.unwrap(), "key1: value1, key2: value2");
    }

    #[test]
    fn test_lowercase_braces_untouched() {
        let text = "base_url: https://api.nasa.gov/neo/rest/v1/neo/{asteroid_id}";
        assert_eq!(interpolate_with(text, lookup(&[])).unwrap(), text);
    }

    #[test]
    fn test_referenced_env_vars() {
        let vars = referenced_env_vars("${NASA_API_KEY:-DEMO_KEY} ${NASA_API_TIER}").unwrap();
        assert_eq!(vars, vec!["NASA_API_KEY", "NASA_API_TIER"]);
    }
}
