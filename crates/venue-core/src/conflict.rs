//! Conflict detection against existing bookings and open sessions

use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::debug;
use venue_api::{Blocker, ConflictInfo, ConflictResult};
use venue_store::Store;
use venue_util::{BookingId, MachineId, TimeWindow};

use crate::CoreResult;

/// Read-only admissibility checks
#[derive(Clone)]
pub struct ConflictDetector {
    store: Arc<dyn Store>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Check whether `window` is free on one machine.
    ///
    /// Bookings of every kind are considered, except `exclude` (the booking
    /// being amended). Open sessions occupy `[start, +inf)`. The first blocker
    /// found is reported.
    pub fn check_conflict(
        &self,
        machine_id: &MachineId,
        window: &TimeWindow,
        exclude: Option<&BookingId>,
    ) -> CoreResult<ConflictResult> {
        let blocking = self
            .store
            .first_overlapping_booking(machine_id, window, exclude)?;

        if let Some(booking) = blocking {
            debug!(
                machine_id = %machine_id,
                blocking_booking = %booking.id,
                "Window overlaps existing booking"
            );
            return Ok(ConflictResult::Conflict(ConflictInfo {
                machine_id: machine_id.clone(),
                window: booking.window,
                blocker: Blocker::Booking {
                    booking_id: booking.id,
                    kind: booking.kind(),
                },
            }));
        }

        let sessions = self.store.open_sessions_on_machine(machine_id)?;
        if let Some(session) = sessions.iter().find(|s| s.window().overlaps(window)) {
            debug!(
                machine_id = %machine_id,
                session_id = %session.id,
                "Window overlaps open session"
            );
            return Ok(ConflictResult::Conflict(ConflictInfo {
                machine_id: machine_id.clone(),
                window: session.window(),
                blocker: Blocker::Session {
                    session_id: session.id,
                    client_id: session.client_id.clone(),
                },
            }));
        }

        Ok(ConflictResult::NoConflict)
    }

    /// Run [`check_conflict`](Self::check_conflict) for each machine in order
    /// and stop at the first conflict.
    pub fn check_machines(
        &self,
        machine_ids: &[MachineId],
        window: &TimeWindow,
        exclude: Option<&BookingId>,
    ) -> CoreResult<ConflictResult> {
        for machine_id in machine_ids {
            let result = self.check_conflict(machine_id, window, exclude)?;
            if result.is_conflict() {
                return Ok(result);
            }
        }
        Ok(ConflictResult::NoConflict)
    }

    /// What, if anything, occupies a machine at one instant
    pub fn machine_busy_at(
        &self,
        machine_id: &MachineId,
        instant: &DateTime<Local>,
    ) -> CoreResult<Option<ConflictInfo>> {
        if let Some(session) = self.store.open_sessions_on_machine(machine_id)?.into_iter().next() {
            return Ok(Some(ConflictInfo {
                machine_id: machine_id.clone(),
                window: session.window(),
                blocker: Blocker::Session {
                    session_id: session.id,
                    client_id: session.client_id,
                },
            }));
        }

        // Bookings are stored to the millisecond
        let moment = TimeWindow {
            start: *instant,
            end: Some(*instant + chrono::Duration::milliseconds(1)),
        };
        Ok(self
            .store
            .first_overlapping_booking(machine_id, &moment, None)?
            .map(|booking| ConflictInfo {
                machine_id: machine_id.clone(),
                window: booking.window,
                blocker: Blocker::Booking {
                    booking_id: booking.id,
                    kind: booking.kind(),
                },
            }))
    }
}
