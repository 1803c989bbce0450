//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use venue_api::{BookingKind, ConflictInfo, PlatformCategory};
use venue_util::{BookingId, ClientId, MachineId, SessionId, TimeWindow};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Machine inventory synced from configuration
    MachinesLoaded { machine_count: usize },

    BookingCreated {
        booking_id: BookingId,
        kind: BookingKind,
        window: TimeWindow,
        machine_ids: Vec<MachineId>,
    },

    BookingUpdated {
        booking_id: BookingId,
        window: TimeWindow,
        machine_ids: Vec<MachineId>,
    },

    BookingDeleted { booking_id: BookingId },

    /// Booking request refused because a machine was unavailable
    BookingRejected {
        kind: BookingKind,
        window: TimeWindow,
        conflict: ConflictInfo,
    },

    SessionOpened {
        session_id: SessionId,
        client_id: ClientId,
        machine_id: MachineId,
    },

    SessionClosed {
        session_id: SessionId,
        client_id: ClientId,
        category: PlatformCategory,
        elapsed_minutes: i64,
        debited_minutes: i64,
        unbilled_minutes: i64,
    },

    BalanceCredited {
        client_id: ClientId,
        category: PlatformCategory,
        minutes: i64,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: venue_util::now(),
            event,
        }
    }
}
