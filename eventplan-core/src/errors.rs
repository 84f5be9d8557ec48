use std::io;

use thiserror::Error;

/// Result type used across the event planning crates.
pub type Result<T> = std::result::Result<T, PlannerError>;

/// Canonical error representation shared by all services.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("timeline generation failed: {0}")]
    Generation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    General(String),
}

impl PlannerError {
    pub fn not_found(message: impl Into<String>) -> Self {
        PlannerError::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        PlannerError::Authorization(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        PlannerError::Validation(message.into())
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(err: serde_json::Error) -> Self {
        PlannerError::Deserialization(err.to_string())
    }
}

impl From<sqlx::Error> for PlannerError {
    fn from(err: sqlx::Error) -> Self {
        PlannerError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for PlannerError {
    fn from(err: anyhow::Error) -> Self {
        PlannerError::General(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {key}: {value}")]
    InvalidEnvVar { key: String, value: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for PlannerError {
    fn from(value: ConfigError) -> Self {
        PlannerError::Config(value.to_string())
    }
}
