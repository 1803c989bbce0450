//! Persistence layer for venue
//!
//! Provides:
//! - Machine inventory
//! - Bookings with their machine assignments (written atomically, overlap re-verified)
//! - Sessions with the one-open-session-per-client constraint
//! - Client minute balances
//! - Audit log (append-only)

mod audit;
mod sqlite;
mod traits;

pub use audit::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;
use venue_api::Blocker;
use venue_util::MachineId;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    /// The database is locked by another writer; the operation can be retried
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// Found while re-verifying inside the write transaction
    #[error("Machine {machine_id} is already occupied")]
    Overlap {
        machine_id: MachineId,
        blocker: Blocker,
    },

    /// The row no longer matches what the caller read; the operation can be retried
    #[error("Changed concurrently: {0}")]
    Stale(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }

    /// Busy or stale: repeating the whole operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_) | StoreError::Stale(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                StoreError::Busy(e.to_string())
            }
            Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::Constraint(e.to_string()),
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
