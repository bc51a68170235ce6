//! Error types for the validation core

use crate::types::DeliveryStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type for validation-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Validation-core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON serialization error (delivery rows)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Code row not found
    #[error("Code not found: {0}")]
    CodeNotFound(String),

    /// Delivery row not found
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(String),

    /// Another active code already carries this value
    #[error("Duplicate active code value")]
    DuplicateCode,

    /// Code was consumed (or revoked) before the commit could apply
    #[error("Code already consumed: {0}")]
    CodeConsumed(Uuid),

    /// Delivery left the required state before the commit could apply
    #[error("Delivery {delivery_id} is {status}, settlement requires IN_TRANSIT")]
    StatusConflict {
        /// Delivery whose state changed under us
        delivery_id: Uuid,
        /// Status observed at commit time
        status: DeliveryStatus,
    },

    /// Generator could not find a structurally valid unique code
    #[error("Code generation exhausted after {attempts} draws")]
    GenerationExhausted {
        /// Number of draws consumed
        attempts: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
