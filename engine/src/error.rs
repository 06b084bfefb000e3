//! Error types for the Tether engine.

use crate::{EntityName, LocalId, NaturalKey};
use thiserror::Error;

/// All possible errors from the Tether engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("entity not found: {0}")]
    EntityNotFound(EntityName),

    #[error("record not found: {0}")]
    RecordNotFound(LocalId),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid natural key field '{field}': expected string or number")]
    InvalidNaturalKey { field: String },

    #[error("missing parent link field: {0}")]
    MissingParentLink(String),

    // Store errors
    #[error("natural key '{key}' already used in {entity}")]
    DuplicateNaturalKey { entity: EntityName, key: NaturalKey },

    #[error("record already exists: {0}")]
    RecordAlreadyExists(LocalId),

    #[error("invalid sync state: {0}")]
    InvalidSyncState(String),

    // Endpoint errors
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpointUrl(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
