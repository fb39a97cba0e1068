//! Error types for the herd_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for herd_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Animal, record, or year summary is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate identifier on create
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation not allowed in the current state (e.g. animal left the herd)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unparseable or out-of-range date
    #[error("Format error: {0}")]
    Format(String),

    /// Same medication supplied twice in one submission
    #[error("Duplicate medication: {0}")]
    DuplicateKey(String),

    /// Negative quantity, or nothing to record
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn animal_not_found(owner_id: u32, animal_id: u32) -> Self {
        Error::NotFound(format!("owner {}, animal {}", owner_id, animal_id))
    }

    pub(crate) fn animal_removed(owner_id: u32, animal_id: u32) -> Self {
        Error::InvalidState(format!(
            "owner {}, animal {} is no longer in the herd",
            owner_id, animal_id
        ))
    }
}
