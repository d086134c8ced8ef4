//! Error types for grimoire-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using grimoire-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in grimoire-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No owner is signed in
    #[error("No owner is signed in")]
    NotAuthenticated,

    /// Creating another character would exceed the per-owner cap
    #[error("Maximum of {limit} characters allowed")]
    CapacityExceeded { limit: usize },

    /// Remote store error
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),
}
