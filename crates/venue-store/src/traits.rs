//! Store trait definitions

use chrono::{DateTime, Local};
use venue_api::{Booking, ClientBalance, Machine, MachineAssignment, PlatformCategory, Session};
use venue_util::{BookingId, ClientId, MachineId, SessionId, TimeWindow};

use crate::{AuditEvent, StoreResult};

/// Main store trait
///
/// Every mutating method is a single transaction: either all of its rows are
/// written or none are.
pub trait Store: Send + Sync {
    // Machines

    /// Insert or update a machine definition
    fn upsert_machine(&self, machine: &Machine) -> StoreResult<()>;

    fn get_machine(&self, id: &MachineId) -> StoreResult<Option<Machine>>;

    fn list_machines(&self) -> StoreResult<Vec<Machine>>;

    // Bookings

    /// Persist a booking and one assignment per machine.
    ///
    /// Inside the write transaction, re-checks that none of the machines
    /// holds an overlapping booking or an open session and fails with
    /// `StoreError::Overlap` otherwise.
    fn insert_booking(&self, booking: &Booking) -> StoreResult<()>;

    /// Overwrite window, details and machine set of an existing booking.
    ///
    /// `previous` is the booking as the caller last read it. If the stored
    /// row differs the write is refused with `StoreError::Stale`. Old
    /// assignments are replaced, not merged. Overlap is re-checked excluding
    /// the booking itself.
    fn replace_booking(&self, previous: &Booking, booking: &Booking) -> StoreResult<()>;

    /// Remove assignments, then the booking. `NotFound` if absent.
    fn delete_booking(&self, id: &BookingId) -> StoreResult<()>;

    fn get_booking(&self, id: &BookingId) -> StoreResult<Option<Booking>>;

    /// All bookings assigned to a machine, ordered by start
    fn bookings_for_machine(&self, machine_id: &MachineId) -> StoreResult<Vec<Booking>>;

    /// Earliest booking on a machine overlapping `window`, other than `exclude`
    fn first_overlapping_booking(
        &self,
        machine_id: &MachineId,
        window: &TimeWindow,
        exclude: Option<&BookingId>,
    ) -> StoreResult<Option<Booking>>;

    /// All bookings overlapping a window, on any machine, ordered by start
    fn bookings_in_window(&self, window: &TimeWindow) -> StoreResult<Vec<Booking>>;

    fn assignments_for_booking(&self, id: &BookingId) -> StoreResult<Vec<MachineAssignment>>;

    // Sessions

    /// Insert a new session.
    ///
    /// For an open session the machine must be free at its start: another
    /// open session or a booking in progress fails with `StoreError::Overlap`,
    /// checked in the same transaction as the insert. At most one open session
    /// per client is allowed; a second one fails with `StoreError::Constraint`.
    fn insert_session(&self, session: &Session) -> StoreResult<()>;

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    fn open_session_for_client(&self, client_id: &ClientId) -> StoreResult<Option<Session>>;

    fn open_sessions_on_machine(&self, machine_id: &MachineId) -> StoreResult<Vec<Session>>;

    /// Close an open session and debit its minutes, floored at zero.
    ///
    /// `NotFound` if the session does not exist or is already closed.
    fn settle_session(&self, settlement: &SessionSettlement) -> StoreResult<BalanceChange>;

    // Balances

    /// Create a zeroed balance row if the client has none
    fn ensure_client(&self, client_id: &ClientId) -> StoreResult<ClientBalance>;

    fn get_balance(&self, client_id: &ClientId) -> StoreResult<Option<ClientBalance>>;

    /// Add minutes to one category, creating the client row when missing
    fn credit_balance(
        &self,
        client_id: &ClientId,
        category: PlatformCategory,
        minutes: i64,
    ) -> StoreResult<ClientBalance>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Everything needed to close a session and charge for it
#[derive(Debug, Clone)]
pub struct SessionSettlement {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub category: PlatformCategory,
    pub ended_at: DateTime<Local>,
    pub end_reason: Option<String>,
    /// Whole minutes to debit
    pub minutes: i64,
}

/// Balance of the debited category around a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub before: i64,
    pub after: i64,
}
