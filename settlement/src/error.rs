//! Error types for the settlement engine

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Actor is not allowed to perform this operation
    #[error("Actor {actor} is not authorized for delivery {delivery_id}")]
    Authorization {
        /// Rejected actor
        actor: String,
        /// Delivery they targeted
        delivery_id: Uuid,
    },

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Delivery is not in a state that admits this operation
    #[error("Delivery {delivery_id} is in status {status}")]
    Conflict {
        /// Delivery in conflict
        delivery_id: Uuid,
        /// Its current status
        status: String,
    },

    /// Too many failed attempts inside the lockout window
    #[error("Too many failed attempts; locked until {window_end}")]
    RateLimited {
        /// When the oldest in-window failure ages out
        window_end: DateTime<Utc>,
    },

    /// Presented code did not match, was expired, or was already consumed
    #[error("Invalid validation code ({remaining} attempts remaining)")]
    InvalidCode {
        /// Attempts left before lockout
        remaining: u32,
    },

    /// Code generation gave up after its draw budget
    #[error("Code generation exhausted after {attempts} attempts")]
    GenerationExhausted {
        /// Draws consumed
        attempts: u32,
    },

    /// Store-level failure during an atomic commit
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<validation_core::Error> for Error {
    fn from(e: validation_core::Error) -> Self {
        use validation_core::Error as Core;
        match e {
            Core::DeliveryNotFound(id) => Error::NotFound(format!("delivery {}", id)),
            Core::CodeNotFound(id) => Error::NotFound(format!("code {}", id)),
            Core::GenerationExhausted { attempts } => Error::GenerationExhausted { attempts },
            Core::StatusConflict {
                delivery_id,
                status,
            } => Error::Conflict {
                delivery_id,
                status: status.to_string(),
            },
            Core::Config(msg) => Error::Config(msg),
            other => Error::Transaction(other.to_string()),
        }
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
