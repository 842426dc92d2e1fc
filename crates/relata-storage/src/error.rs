//! Back-end internal errors and their mapping onto the stable codes.
//!
//! Driver and serialization detail stays inside this crate: it is logged
//! at the call site and collapses to a bare code before crossing the
//! storage contract.

use thiserror::Error;

/// Internal storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database connection failed: {message}")]
    Connection { message: String },

    #[error("database query failed: {message}")]
    Query { message: String },

    #[error("row decode failed: {message}")]
    Decode { message: String },

    #[error("schema serialization failed: {message}")]
    Serialization { message: String },
}

impl From<StorageError> for relata_domain::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection { .. } | StorageError::Query { .. } => {
                relata_domain::Error::Execution
            }
            StorageError::Decode { .. } | StorageError::Serialization { .. } => {
                relata_domain::Error::TypeConversion
            }
        }
    }
}
