//! Error types
//!
//! `ApiError` is the single error type crossing module boundaries. Every variant maps onto
//! one wire-level [`ErrorKind`] so handler failures can be returned to a client as a plain
//! `{kind, message}` payload instead of tearing the connection down.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage-layer failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage engine error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Error taxonomy shared by the authority and its clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Duplicate id, slug or path on open
    Structural,
    /// Unknown environment, slug or path
    NotFound,
    /// Privileged action attempted by a non-privileged client
    Permission,
    /// Request failed or timed out in transit
    Transport,
    /// Malformed rename or tag input
    Validation,
    /// Anything else (storage, configuration, I/O)
    Internal,
}

/// API error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Environment is already open: {0}")]
    AlreadyOpen(String),

    #[error("Opened environment has duplicate id: {0}")]
    DuplicateId(String),

    #[error("Opened environment has duplicate slug: {0}")]
    DuplicateSlug(String),

    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("Environment with slug \"{0}\" does not exist")]
    SlugNotFound(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error reported by the remote side of a connection
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::AlreadyOpen(_) | ApiError::DuplicateId(_) | ApiError::DuplicateSlug(_) => {
                ErrorKind::Structural
            }
            ApiError::EnvironmentNotFound(_)
            | ApiError::SlugNotFound(_)
            | ApiError::PathNotFound(_)
            | ApiError::EntityNotFound(_) => ErrorKind::NotFound,
            ApiError::PermissionDenied(_) => ErrorKind::Permission,
            ApiError::Transport(_) | ApiError::Timeout(_) => ErrorKind::Transport,
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::StorageError(_) | ApiError::ConfigError(_) | ApiError::Io(_) => {
                ErrorKind::Internal
            }
            ApiError::Remote { kind, .. } => *kind,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<sled::Error> for ApiError {
    fn from(err: sled::Error) -> Self {
        ApiError::StorageError(StorageError::Sled(err))
    }
}

/// Serializable error carried in `{error}` replies and batch outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<ErrorPayload> for ApiError {
    fn from(payload: ErrorPayload) -> Self {
        ApiError::Remote {
            kind: payload.kind,
            message: payload.message,
        }
    }
}
