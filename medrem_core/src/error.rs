//! Error types for the medrem_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medrem_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record id was not present in its collection
    #[error("{collection} record not found: {id}")]
    NotFound { collection: &'static str, id: String },

    /// Malformed input rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// The underlying store rejected a read or write
    #[error("Store error: {0}")]
    Store(String),

    /// An import bundle was rejected; nothing was written
    #[error("Import rejected: {0}")]
    Import(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(collection: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            collection,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for errors a caller can treat as "nothing changed"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
