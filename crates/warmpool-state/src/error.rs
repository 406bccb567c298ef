//! Error types for the warmpool registry store.

use thiserror::Error;
use warmpool_core::RegistryError;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("database held by another process: {0}")]
    Busy(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl From<StateError> for RegistryError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Busy(msg) => RegistryError::Busy(msg),
            other => RegistryError::Unavailable(other.to_string()),
        }
    }
}
