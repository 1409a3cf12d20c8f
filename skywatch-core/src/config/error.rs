//! Configuration error types
//!
//! Loading fails with a [`ConfigError`]; schema problems carry the dotted
//! field path (`providers[1].endpoints[0].base_url`) of the offending value.

use std::fmt;
use thiserror::Error;

/// Failure to load a provider configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read provider config '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed provider config '{path}' (line {}, column {}): {message}",
            .line.unwrap_or(0), .column.unwrap_or(0))]
    ParseError {
        path: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error("Invalid provider config: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Environment variable '{var}' is not set and has no default")]
    EnvVarNotFound { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// A schema violation at a specific field
#[derive(Debug, Error)]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
    pub context: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_path, self.kind)?;
        match &self.context {
            Some(ctx) => write!(f, " ({})", ctx),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("required field is missing")]
    RequiredFieldMissing,

    #[error("expected {expected}, got {actual}")]
    InvalidValue { expected: String, actual: String },

    #[error("out of range: {message}")]
    OutOfRange { message: String },

    #[error("bad format: {message}")]
    InvalidFormat { message: String },

    #[error("'{value}' appears more than once")]
    DuplicateValue { value: String },

    #[error("conflicting settings: {message}")]
    Incompatible { message: String },

    #[error("bad URL: {message}")]
    InvalidUrl { message: String },

    #[error("unsupported schema version {actual} (expected {expected})")]
    InvalidVersion { expected: String, actual: String },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn required(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::RequiredFieldMissing)
    }

    pub fn invalid_value(
        field_path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let kind = ValidationErrorKind::InvalidValue {
            expected: expected.into(),
            actual: actual.into(),
        };
        Self::new(field_path, kind)
    }

    pub fn out_of_range(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::OutOfRange { message })
    }

    pub fn invalid_format(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::InvalidFormat { message })
    }

    pub fn duplicate(field_path: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(field_path, ValidationErrorKind::DuplicateValue { value })
    }

    pub fn incompatible(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::Incompatible { message })
    }

    pub fn invalid_url(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::InvalidUrl { message })
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
