//! Core error taxonomy

use thiserror::Error;
use venue_api::ConflictInfo;
use venue_store::StoreError;
use venue_util::{BookingId, ClientId, MachineId, SessionId, WindowError};

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; retrying will not help
    Validation,
    /// The target overlaps an existing booking or session
    Conflict,
    NotFound,
    /// Lost a race with a concurrent writer
    Concurrency,
    Internal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("A booking needs at least one machine")]
    EmptyMachineSet,

    #[error("Invalid window: {0}")]
    InvalidWindow(#[from] WindowError),

    #[error("Booking conflict: {0}")]
    Conflict(Box<ConflictInfo>),

    #[error("Machine unavailable: {0}")]
    MachineBusy(Box<ConflictInfo>),

    #[error("Client {client_id} already has open session {session_id}")]
    SessionAlreadyOpen {
        client_id: ClientId,
        session_id: SessionId,
    },

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("Session not found or already closed: {0}")]
    SessionNotFound(SessionId),

    #[error("Machine not found: {0}")]
    MachineNotFound(MachineId),

    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),

    #[error("Gave up after {attempts} attempt(s) because of concurrent modification")]
    Concurrency { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::EmptyMachineSet | CoreError::InvalidWindow(_) => {
                ErrorKind::Validation
            }
            CoreError::Conflict(_)
            | CoreError::MachineBusy(_)
            | CoreError::SessionAlreadyOpen { .. } => ErrorKind::Conflict,
            CoreError::BookingNotFound(_)
            | CoreError::SessionNotFound(_)
            | CoreError::MachineNotFound(_)
            | CoreError::ClientNotFound(_) => ErrorKind::NotFound,
            CoreError::Concurrency { .. } => ErrorKind::Concurrency,
            CoreError::Store(e) if e.is_transient() => ErrorKind::Concurrency,
            CoreError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }

    /// The blocker behind a conflict error, if any
    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match self {
            CoreError::Conflict(info) | CoreError::MachineBusy(info) => Some(info),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
