//! Error types for configuration loading.

use thiserror::Error;

/// Result alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading worker settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent or empty.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// A variable was present but held an unusable value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_stay_constant() {
        let missing = ConfigError::MissingEnv {
            name: "DOWNPOUR_DEBRID_TOKEN",
        };
        assert_eq!(missing.to_string(), "missing environment configuration");

        let invalid = ConfigError::InvalidField {
            field: "poll_interval",
            value: "soon".to_string(),
            reason: "not_a_number",
        };
        assert_eq!(invalid.to_string(), "invalid configuration field");
    }
}
