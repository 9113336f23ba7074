//! Shared error and result types for lab lifecycle operations.

use lab_state::StoreError;
use lab_storage::ObjectStoreError;
use thiserror::Error;

use super::resources::{ClusterError, ResourceKind};
use super::templates::TemplateError;

/// Errors surfaced by the lab orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed request field
    #[error("Validation error: {0}")]
    Validation(String),

    /// Admission denied; the caller may retry later
    #[error("Exceeded maximum concurrent labs ({current}/{limit})")]
    CapacityExceeded { current: usize, limit: usize },

    #[error("Failed to create {kind} '{name}': {source}")]
    ResourceCreation {
        kind: ResourceKind,
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("Failed to delete {kind} '{name}': {source}")]
    ResourceDeletion {
        kind: ResourceKind,
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("Lab state store error: {0}")]
    Store(#[from] StoreError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Quest not found: {0}")]
    QuestNotFound(String),

    #[error("Quest catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
