//! Conflict reports

use serde::{Deserialize, Serialize};
use std::fmt;
use venue_util::{format_datetime_full, BookingId, ClientId, MachineId, SessionId, TimeWindow};

use crate::BookingKind;

/// What is occupying a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Blocker {
    Booking {
        booking_id: BookingId,
        kind: BookingKind,
    },
    /// A session that has not been closed yet
    Session {
        session_id: SessionId,
        client_id: ClientId,
    },
}

/// Why a machine cannot take the requested window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub machine_id: MachineId,
    /// Window of the blocking booking or session
    pub window: TimeWindow,
    pub blocker: Blocker,
}

impl ConflictInfo {
    pub fn booking_id(&self) -> Option<BookingId> {
        match &self.blocker {
            Blocker::Booking { booking_id, .. } => Some(*booking_id),
            Blocker::Session { .. } => None,
        }
    }
}

impl fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let until = match self.window.end {
            Some(end) => format!("until {}", format_datetime_full(&end)),
            None => "with no end time".to_string(),
        };
        match &self.blocker {
            Blocker::Booking { booking_id, kind } => write!(
                f,
                "machine {} is busy {} because of {} booking {}",
                self.machine_id, until, kind, booking_id
            ),
            Blocker::Session {
                session_id,
                client_id,
            } => write!(
                f,
                "machine {} is in use {} by client {} (session {})",
                self.machine_id, until, client_id, session_id
            ),
        }
    }
}

/// Outcome of a single (machine, window) admissibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResult {
    NoConflict,
    Conflict(ConflictInfo),
}

impl ConflictResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConflictResult::Conflict(_))
    }
}
