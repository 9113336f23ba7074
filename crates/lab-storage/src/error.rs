//! Error types for object-store access.

use thiserror::Error;

/// Errors returned by [`crate::ObjectStore`] implementations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The backend rejected or failed the request
    #[error("{operation} failed for key '{key}': {message}")]
    Request {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// The request did not complete within the per-operation timeout
    #[error("{operation} timed out for key '{key}'")]
    Timeout { operation: &'static str, key: String },

    /// Client settings are missing or invalid
    #[error("Object store configuration error: {0}")]
    Config(String),
}

impl ObjectStoreError {
    pub(crate) fn request(operation: &'static str, key: &str, message: impl ToString) -> Self {
        Self::Request {
            operation,
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = ObjectStoreError> = std::result::Result<T, E>;
