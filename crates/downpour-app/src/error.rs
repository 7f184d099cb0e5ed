//! Application-level errors for worker bootstrap and orchestration.
//!
//! Messages stay constant; context travels in fields. A bootstrap error
//! terminates the process with a non-zero exit code.

use thiserror::Error;

use downpour_config::ConfigError;
use downpour_data::DataError;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings could not be loaded from the environment.
    #[error("configuration loading failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Failure detail.
        detail: anyhow::Error,
    },
    /// The persistence layer failed during bootstrap.
    #[error("data layer operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: DataError,
    },
    /// The debrid client could not be constructed.
    #[error("debrid client operation failed")]
    Debrid {
        /// Operation identifier.
        operation: &'static str,
        /// Failure detail.
        detail: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn error_messages_stay_constant() {
        let config = AppError::Config {
            operation: "settings.from_env",
            source: ConfigError::MissingEnv {
                name: "DOWNPOUR_DATABASE_URL",
            },
        };
        assert_eq!(config.to_string(), "configuration loading failed");
        assert!(config.source().is_some());

        let telemetry = AppError::Telemetry {
            operation: "telemetry.init",
            detail: anyhow::anyhow!("subscriber already installed"),
        };
        assert_eq!(telemetry.to_string(), "telemetry operation failed");

        let data = AppError::Data {
            operation: "store.connect",
            source: DataError::QueryFailed {
                operation: "store.connect",
                source: sqlx::Error::PoolClosed,
            },
        };
        assert_eq!(data.to_string(), "data layer operation failed");
        assert!(data.source().is_some());
    }
}
