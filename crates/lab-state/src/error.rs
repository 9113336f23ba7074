//! Error types for the shared lab state store.

use thiserror::Error;

/// Errors raised while reading or writing lab state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend command failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No instance record exists for the lab
    #[error("Lab instance not found: {0}")]
    NotFound(String),

    /// Optimistic write lost the race too many times
    #[error("Concurrent update conflict for lab {lab_id} after {attempts} attempts")]
    Conflict { lab_id: String, attempts: u32 },

    /// Required runtime setting is missing
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
