//! Persistence layer for hearthd
//!
//! Provides:
//! - Game sessions (open/closed)
//! - Purchase approvals with conditional status transitions
//! - Spend ledger for auto-approved purchases
//! - Audit log (append-only)

mod audit;
mod sqlite;
mod traits;

pub use audit::*;
pub use sqlite::*;
pub use traits::*;

use hearth_util::HearthError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Database and I/O failures surface as retryable upstream errors. Rows that
/// cannot be decoded will not get better on retry and map to `Internal`.
impl From<StoreError> for HearthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(_) | StoreError::Io(_) => HearthError::Upstream(e.to_string()),
            StoreError::Serialization(_) | StoreError::Corrupt(_) => {
                HearthError::Internal(e.to_string())
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
