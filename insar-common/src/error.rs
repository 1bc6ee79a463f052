//! Common error types for the InSAR run engine

use thiserror::Error;

/// Common result type for InSAR operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the InSAR crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected run request: missing bbox, bad source, unknown pipeline, bad params
    #[error("Validation error: {0}")]
    Validation(String),

    /// Failure inside a pipeline while a run was executing
    #[error("Execution error: {0}")]
    Execution(String),

    /// External experiment tracker failure
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::Validation`]
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// True for errors the caller caused by sending a bad request
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
