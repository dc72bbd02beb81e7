//! Standardized error handling for the relay
//! Provides the error taxonomy shared by repair, mapping, dispatch and the batch handler

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Serializable error summary attached to failed records and reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSummary {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Error types for the relay
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Repair error: {message}")]
    Repair {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Template error in '{template}': {message}")]
    Template { template: String, message: String },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {message}")]
    Encoding { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RelayError {
    /// Create a repair error carrying the original parse failure
    pub fn repair<S: Into<String>>(message: S, source: serde_json::Error) -> Self {
        Self::Repair {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn template<T: Into<String>, S: Into<String>>(template: T, message: S) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration_with_source<S: Into<String>>(message: S, source: anyhow::Error) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn encoding<S: Into<String>>(message: S) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Create an internal error for states callers should never produce
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable error code used in logs and failure reports
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Repair { .. } => "REPAIR_FAILURE",
            Self::Validation { .. } => "VALIDATION_FAILURE",
            Self::Transport { .. } => "TRANSPORT_FAILURE",
            Self::Template { .. } => "TEMPLATE_ERROR",
            Self::Configuration { .. } => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Encoding { .. } => "ENCODING_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether redelivering the same input could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn to_summary(&self) -> ErrorSummary {
        ErrorSummary {
            code: self.error_code().to_string(),
            message: self.to_string(),
            field: match self {
                Self::Validation { field, .. } => field.clone(),
                _ => None,
            },
        }
    }

    /// Log the error at the level its category deserves
    pub fn log(&self, context: &str) {
        match self {
            Self::Internal { .. } | Self::Configuration { .. } | Self::Encoding { .. } => {
                error!(code = self.error_code(), "{}: {}", context, self);
            }
            Self::Transport { .. } | Self::Repair { .. } | Self::Validation { .. } => {
                warn!(code = self.error_code(), "{}: {}", context, self);
            }
            _ => {
                info!(code = self.error_code(), "{}: {}", context, self);
            }
        }
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_config_context<F>(self, f: F) -> RelayResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn with_config_context<F>(self, f: F) -> RelayResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RelayError::configuration_with_source(f(), e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_codes() {
        let err = RelayError::transport("queue unavailable");
        assert_eq!(err.error_code(), "TRANSPORT_FAILURE");
        assert!(err.is_transient());

        let err = RelayError::validation_field("missing Id", "Id");
        assert_eq!(err.error_code(), "VALIDATION_FAILURE");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_summary_carries_field() {
        let summary =
            RelayError::validation_field("missing AwsAccountId", "AwsAccountId").to_summary();
        assert_eq!(summary.code, "VALIDATION_FAILURE");
        assert_eq!(summary.field.as_deref(), Some("AwsAccountId"));
        assert!(summary.message.contains("missing AwsAccountId"));
    }

    #[test]
    fn test_error_context_maps_to_configuration() {
        let err = "many"
            .parse::<usize>()
            .with_config_context(|| "MAX_ROWS_PER_FILE must be a positive integer".to_string())
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(std::error::Error::source(&err).is_some());
    }
}
