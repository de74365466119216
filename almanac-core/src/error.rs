//! Error types for almanac.

use thiserror::Error;

/// Errors that can occur in almanac operations.
#[derive(Error, Debug)]
pub enum AlmanacError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid recurrence rule for event '{uid}': {reason}")]
    RecurrenceParse { uid: String, reason: String },

    #[error("Malformed calendar item: {0}")]
    MalformedItem(String),

    #[error("Stale import for '{uid}': stored SEQUENCE {stored}, incoming {incoming}")]
    ImportConflict {
        uid: String,
        stored: i64,
        incoming: i64,
    },

    #[error("An event with UID '{0}' already exists")]
    DuplicateUid(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ICS generation error: {0}")]
    IcsGenerate(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for almanac operations.
pub type AlmanacResult<T> = Result<T, AlmanacError>;
