//! # Design
//!
//! - Centralize application-level errors for the boot sequence.
//! - Keep error messages constant while carrying context fields for
//!   debugging.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration failed to load.
    #[error("configuration loading failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: cordon_config::ConfigError,
    },
    /// Logging initialisation failed.
    #[error("telemetry initialisation failed: {details}")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Rendered cause chain.
        details: String,
    },
    /// The API server failed to bind or serve.
    #[error("api server operation failed: {details}")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Rendered cause chain.
        details: String,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: cordon_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) fn telemetry(operation: &'static str, source: &anyhow::Error) -> Self {
        Self::Telemetry {
            operation,
            details: format!("{source:#}"),
        }
    }

    pub(crate) fn api_server(operation: &'static str, source: &anyhow::Error) -> Self {
        Self::ApiServer {
            operation,
            details: format!("{source:#}"),
        }
    }
}
