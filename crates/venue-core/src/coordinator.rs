//! Reservation coordinator: validated, conflict-checked booking mutations

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use venue_api::{Booking, BookingDetails, BookingKind, ConflictResult};
use venue_config::BookingSettings;
use venue_store::{AuditEvent, AuditEventType, Store, StoreError};
use venue_util::{BookingId, MachineId, StaffId, TimeWindow};

use crate::{ConflictDetector, CoreError, CoreResult, MachineLocks};

/// A new booking as submitted by staff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub details: BookingDetails,
    pub window: TimeWindow,
    pub machine_ids: Vec<MachineId>,
    pub created_by: StaffId,
}

/// Partial update; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingAmendment {
    pub window: Option<TimeWindow>,
    /// Replaces the whole machine set
    pub machine_ids: Option<Vec<MachineId>>,
    pub details: Option<BookingDetails>,
}

impl BookingAmendment {
    pub fn is_empty(&self) -> bool {
        self.window.is_none() && self.machine_ids.is_none() && self.details.is_none()
    }

    /// `booking` with every set field replaced
    pub fn apply(&self, booking: &Booking) -> Booking {
        let mut updated = booking.clone();
        if let Some(window) = self.window {
            updated.window = window;
        }
        if let Some(machine_ids) = &self.machine_ids {
            updated.machine_ids = machine_ids.clone();
        }
        if let Some(details) = &self.details {
            updated.details = details.clone();
        }
        updated
    }

    /// Machines an update of `booking` touches: the current set plus the new one
    fn lock_set(&self, booking: &Booking) -> Vec<MachineId> {
        let mut machine_ids = booking.machine_ids.clone();
        if let Some(replacement) = &self.machine_ids {
            machine_ids.extend(replacement.iter().cloned());
        }
        machine_ids
    }
}

pub struct ReservationCoordinator {
    store: Arc<dyn Store>,
    detector: ConflictDetector,
    locks: Arc<MachineLocks>,
    settings: BookingSettings,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn Store>, locks: Arc<MachineLocks>, settings: BookingSettings) -> Self {
        Self {
            detector: ConflictDetector::new(store.clone()),
            store,
            locks,
            settings,
        }
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Create a booking on every requested machine, or on none.
    pub async fn create_booking(&self, request: BookingRequest) -> CoreResult<BookingId> {
        self.validate_machines(&request.machine_ids)?;
        self.validate_window(&request.window)?;

        let booking = Booking {
            id: BookingId::new(),
            window: request.window,
            details: request.details,
            created_by: request.created_by,
            created_at: venue_util::now(),
            machine_ids: request.machine_ids,
        };

        let result = self
            .with_retries("create_booking", || self.try_create(&booking))
            .await;

        if let Err(e) = result {
            self.audit_rejection(booking.kind(), &booking.window, &e);
            return Err(e);
        }

        info!(
            booking_id = %booking.id,
            kind = %booking.kind(),
            window = %booking.window,
            machine_count = booking.machine_ids.len(),
            "Booking created"
        );

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::BookingCreated {
            booking_id: booking.id,
            kind: booking.kind(),
            window: booking.window,
            machine_ids: booking.machine_ids.clone(),
        }));

        Ok(booking.id)
    }

    async fn try_create(&self, booking: &Booking) -> CoreResult<()> {
        let _guards = self
            .locks
            .acquire(&booking.machine_ids, self.settings.lock_timeout)
            .await?;

        let result = self
            .detector
            .check_machines(&booking.machine_ids, &booking.window, None)?;
        if let ConflictResult::Conflict(info) = result {
            return Err(CoreError::Conflict(Box::new(info)));
        }

        match self.store.insert_booking(booking) {
            Ok(()) => Ok(()),
            Err(StoreError::Overlap { machine_id, .. }) => {
                Err(self.overlap_error(&machine_id, &booking.window, None)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Change window, machines or details of an existing booking.
    ///
    /// The booking is checked against everything except itself. A new
    /// machine set replaces the old one. The amendment is applied to the
    /// booking as it stands once its machines are locked, so concurrent
    /// amendments touching different fields all survive.
    pub async fn update_booking(
        &self,
        id: &BookingId,
        amendment: BookingAmendment,
    ) -> CoreResult<Booking> {
        if amendment.is_empty() {
            return self.get_booking(id);
        }
        if let Some(machine_ids) = &amendment.machine_ids {
            self.validate_machines(machine_ids)?;
        }
        if let Some(window) = &amendment.window {
            self.validate_window(window)?;
        }

        let result = self
            .with_retries("update_booking", || self.try_update(id, &amendment))
            .await;

        let updated = match result {
            Ok(updated) => updated,
            Err(e) => {
                if let Ok(current) = self.get_booking(id) {
                    let attempted = amendment.apply(&current);
                    self.audit_rejection(attempted.kind(), &attempted.window, &e);
                }
                return Err(e);
            }
        };

        info!(
            booking_id = %id,
            window = %updated.window,
            machine_count = updated.machine_ids.len(),
            "Booking updated"
        );

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::BookingUpdated {
            booking_id: *id,
            window: updated.window,
            machine_ids: updated.machine_ids.clone(),
        }));

        Ok(updated)
    }

    async fn try_update(&self, id: &BookingId, amendment: &BookingAmendment) -> CoreResult<Booking> {
        // Old machines are locked too so a concurrent booking cannot slip
        // into the slot being vacated before the assignments are replaced
        let planned = self.get_booking(id)?;
        let lock_set = amendment.lock_set(&planned);

        let _guards = self
            .locks
            .acquire(&lock_set, self.settings.lock_timeout)
            .await?;

        let current = self.get_booking(id)?;
        if !amendment.lock_set(&current).iter().all(|m| lock_set.contains(m)) {
            debug!(booking_id = %id, "Machine set changed while waiting for locks");
            return Err(CoreError::Concurrency { attempts: 1 });
        }

        let updated = amendment.apply(&current);
        self.validate_machines(&updated.machine_ids)?;
        self.validate_window(&updated.window)?;

        if let ConflictResult::Conflict(info) = self.detector.check_machines(
            &updated.machine_ids,
            &updated.window,
            Some(&updated.id),
        )? {
            return Err(CoreError::Conflict(Box::new(info)));
        }

        match self.store.replace_booking(&current, &updated) {
            Ok(()) => Ok(updated),
            Err(StoreError::NotFound(_)) => Err(CoreError::BookingNotFound(*id)),
            Err(StoreError::Overlap { machine_id, .. }) => {
                Err(self.overlap_error(&machine_id, &updated.window, Some(id))?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a booking and its assignments. No conflict check is needed.
    pub async fn delete_booking(&self, id: &BookingId) -> CoreResult<()> {
        let current = self.get_booking(id)?;

        self.with_retries("delete_booking", || self.try_delete(&current))
            .await?;

        info!(booking_id = %id, "Booking deleted");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::BookingDeleted { booking_id: *id }));

        Ok(())
    }

    async fn try_delete(&self, booking: &Booking) -> CoreResult<()> {
        let _guards = self
            .locks
            .acquire(&booking.machine_ids, self.settings.lock_timeout)
            .await?;

        match self.store.delete_booking(&booking.id) {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(CoreError::BookingNotFound(booking.id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_booking(&self, id: &BookingId) -> CoreResult<Booking> {
        self.store
            .get_booking(id)?
            .ok_or(CoreError::BookingNotFound(*id))
    }

    /// Every booking on a machine, ordered by start
    pub fn bookings_for_machine(&self, machine_id: &MachineId) -> CoreResult<Vec<Booking>> {
        self.require_machine(machine_id)?;
        Ok(self.store.bookings_for_machine(machine_id)?)
    }

    /// Every booking touching a window, on any machine
    pub fn bookings_in_window(&self, window: &TimeWindow) -> CoreResult<Vec<Booking>> {
        window.validate()?;
        Ok(self.store.bookings_in_window(window)?)
    }

    /// Read-only conflict check for one machine
    pub fn check_availability(
        &self,
        machine_id: &MachineId,
        window: &TimeWindow,
    ) -> CoreResult<ConflictResult> {
        window.validate()?;
        self.require_machine(machine_id)?;
        self.detector.check_conflict(machine_id, window, None)
    }

    fn require_machine(&self, machine_id: &MachineId) -> CoreResult<()> {
        match self.store.get_machine(machine_id)? {
            Some(_) => Ok(()),
            None => Err(CoreError::MachineNotFound(machine_id.clone())),
        }
    }

    fn validate_machines(&self, machine_ids: &[MachineId]) -> CoreResult<()> {
        if machine_ids.is_empty() {
            return Err(CoreError::EmptyMachineSet);
        }

        let mut seen = HashSet::new();
        for machine_id in machine_ids {
            if !seen.insert(machine_id) {
                return Err(CoreError::Validation(format!(
                    "machine {} listed more than once",
                    machine_id
                )));
            }
            self.require_machine(machine_id)?;
        }
        Ok(())
    }

    fn validate_window(&self, window: &TimeWindow) -> CoreResult<()> {
        window.validate()?;

        if let Some(end) = window.end {
            if end.timestamp_millis() <= window.start.timestamp_millis() {
                return Err(CoreError::Validation(format!(
                    "window {} is shorter than one millisecond",
                    window
                )));
            }
        }

        if let (Some(max), Some(duration)) = (self.settings.max_duration, window.duration()) {
            let too_long = chrono::Duration::from_std(max).is_ok_and(|max| duration > max);
            if too_long {
                return Err(CoreError::Validation(format!(
                    "window {} is longer than the {} hour maximum",
                    window,
                    max.as_secs() / 3600
                )));
            }
        }
        Ok(())
    }

    /// Build a conflict error after the store rejected a write on overlap.
    ///
    /// If the blocker is gone by the time we look, the write lost a race and
    /// is worth retrying.
    fn overlap_error(
        &self,
        machine_id: &MachineId,
        window: &TimeWindow,
        exclude: Option<&BookingId>,
    ) -> CoreResult<CoreError> {
        Ok(match self.detector.check_conflict(machine_id, window, exclude)? {
            ConflictResult::Conflict(info) => CoreError::Conflict(Box::new(info)),
            ConflictResult::NoConflict => CoreError::Concurrency { attempts: 1 },
        })
    }

    /// Run `op` until it succeeds, fails for a non-transient reason, or the
    /// retry budget is spent.
    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut op: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Err(e) if e.is_retryable() => {
                    if attempts > self.settings.max_retries {
                        warn!(operation, attempts, error = %e, "Giving up after repeated contention");
                        return Err(CoreError::Concurrency { attempts });
                    }
                    debug!(operation, attempts, error = %e, "Retrying after contention");
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    fn audit_rejection(&self, kind: BookingKind, window: &TimeWindow, error: &CoreError) {
        let Some(conflict) = error.conflict() else {
            return;
        };

        info!(kind = %kind, window = %window, reason = %conflict, "Booking rejected");
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::BookingRejected {
            kind,
            window: *window,
            conflict: conflict.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Local, TimeZone};
    use std::time::Duration;
    use venue_api::{Blocker, EventStatus, Machine, MaintenancePriority, PlatformCategory};
    use venue_store::SqliteStore;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 26, hour, minute, 0).unwrap()
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow::closed(at(start.0, start.1), at(end.0, end.1)).unwrap()
    }

    fn machines(names: &[&str]) -> Vec<MachineId> {
        names.iter().map(|n| MachineId::new(*n)).collect()
    }

    fn setup() -> (Arc<SqliteStore>, ReservationCoordinator) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        for (id, category) in [
            ("pc-01", PlatformCategory::General),
            ("pc-02", PlatformCategory::General),
            ("ps5-01", PlatformCategory::Console),
        ] {
            store.upsert_machine(&Machine::new(id, category)).unwrap();
        }
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            Arc::new(MachineLocks::new()),
            BookingSettings::default(),
        );
        (store, coordinator)
    }

    fn event_request(window: TimeWindow, machine_ids: &[&str]) -> BookingRequest {
        BookingRequest {
            details: BookingDetails::Event {
                name: "LAN party".into(),
                status: EventStatus::Scheduled,
                customer: None,
            },
            window,
            machine_ids: machines(machine_ids),
            created_by: StaffId::new("staff-1"),
        }
    }

    fn maintenance_request(window: TimeWindow, machine_ids: &[&str]) -> BookingRequest {
        BookingRequest {
            details: BookingDetails::Maintenance {
                category: "upgrade".into(),
                priority: MaintenancePriority::High,
            },
            window,
            machine_ids: machines(machine_ids),
            created_by: StaffId::new("staff-2"),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_store, coordinator) = setup();
        let id = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01", "pc-02"]))
            .await
            .unwrap();

        let booking = coordinator.get_booking(&id).unwrap();
        assert_eq!(booking.kind(), BookingKind::Event);
        assert_eq!(booking.machine_ids, machines(&["pc-01", "pc-02"]));
        assert_eq!(
            coordinator
                .bookings_for_machine(&MachineId::new("pc-02"))
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_validation() {
        let (_store, coordinator) = setup();

        let err = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EmptyMachineSet));

        let err = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01", "pc-01"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let err = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-99"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::MachineNotFound(_)));

        let inverted = TimeWindow {
            start: at(12, 0),
            end: Some(at(10, 0)),
        };
        let err = coordinator
            .create_booking(event_request(inverted, &["pc-01"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidWindow(_)));
    }

    #[tokio::test]
    async fn test_max_duration() {
        let (_store, coordinator) = setup();
        let start = at(10, 0);
        let too_long = TimeWindow::closed(start, start + chrono::Duration::days(15)).unwrap();

        let err = coordinator
            .create_booking(maintenance_request(too_long, &["pc-01"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        // Open-ended windows have no duration to limit
        coordinator
            .create_booking(maintenance_request(TimeWindow::open_ended(start), &["pc-01"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_conflict_is_all_or_nothing() {
        let (store, coordinator) = setup();
        let existing = coordinator
            .create_booking(maintenance_request(window((10, 0), (12, 0)), &["pc-02"]))
            .await
            .unwrap();

        let err = coordinator
            .create_booking(event_request(window((11, 0), (13, 0)), &["pc-01", "pc-02"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
        assert_eq!(err.conflict().and_then(|c| c.booking_id()), Some(existing));

        // Nothing landed on the free machine
        assert!(store
            .bookings_for_machine(&MachineId::new("pc-01"))
            .unwrap()
            .is_empty());

        let audits = store.get_recent_audits(1).unwrap();
        assert!(matches!(
            audits[0].event,
            AuditEventType::BookingRejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_update_does_not_conflict_with_itself() {
        let (_store, coordinator) = setup();
        let id = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap();

        let updated = coordinator
            .update_booking(
                &id,
                BookingAmendment {
                    window: Some(window((11, 0), (13, 0))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.window, window((11, 0), (13, 0)));
    }

    #[tokio::test]
    async fn test_update_replaces_machine_set() {
        let (_store, coordinator) = setup();
        let id = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01", "pc-02"]))
            .await
            .unwrap();

        coordinator
            .update_booking(
                &id,
                BookingAmendment {
                    machine_ids: Some(machines(&["ps5-01"])),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(coordinator
            .bookings_for_machine(&MachineId::new("pc-01"))
            .unwrap()
            .is_empty());
        assert_eq!(
            coordinator.get_booking(&id).unwrap().machine_ids,
            machines(&["ps5-01"])
        );

        // The vacated machine is bookable again
        coordinator
            .create_booking(maintenance_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_rejects_conflict_and_keeps_original() {
        let (_store, coordinator) = setup();
        let first = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap();
        let second = coordinator
            .create_booking(event_request(window((13, 0), (14, 0)), &["pc-01"]))
            .await
            .unwrap();

        let err = coordinator
            .update_booking(
                &second,
                BookingAmendment {
                    window: Some(window((11, 30), (14, 0))),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.conflict().and_then(|c| c.booking_id()), Some(first));
        assert_eq!(
            coordinator.get_booking(&second).unwrap().window,
            window((13, 0), (14, 0))
        );
    }

    #[tokio::test]
    async fn test_queued_amendments_both_apply() {
        let (_store, coordinator) = setup();
        let id = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap();

        // Both amendments read the booking, then wait on the machine lock
        let held = coordinator
            .locks
            .acquire(&machines(&["pc-01"]), Duration::from_secs(1))
            .await
            .unwrap();
        let reschedule = coordinator.update_booking(
            &id,
            BookingAmendment {
                window: Some(window((14, 0), (16, 0))),
                ..Default::default()
            },
        );
        let rename = coordinator.update_booking(
            &id,
            BookingAmendment {
                details: Some(BookingDetails::Event {
                    name: "Finals".into(),
                    status: EventStatus::Confirmed,
                    customer: None,
                }),
                ..Default::default()
            },
        );
        let release = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(held);
        };

        let (rescheduled, renamed, ()) = tokio::join!(reschedule, rename, release);
        rescheduled.unwrap();
        renamed.unwrap();

        let booking = coordinator.get_booking(&id).unwrap();
        assert_eq!(booking.window, window((14, 0), (16, 0)));
        assert!(matches!(
            booking.details,
            BookingDetails::Event { ref name, .. } if name == "Finals"
        ));
    }

    #[tokio::test]
    async fn test_sub_millisecond_window_is_rejected() {
        let (store, coordinator) = setup();
        let start = at(10, 0);
        let sliver = TimeWindow::closed(start, start + chrono::Duration::microseconds(500)).unwrap();

        let err = coordinator
            .create_booking(maintenance_request(sliver, &["pc-01"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        assert!(store
            .bookings_for_machine(&MachineId::new("pc-01"))
            .unwrap()
            .is_empty());

        let id = coordinator
            .create_booking(maintenance_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap();
        let err = coordinator
            .update_booking(
                &id,
                BookingAmendment {
                    window: Some(sliver),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_update_can_change_kind() {
        let (_store, coordinator) = setup();
        let id = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap();

        let updated = coordinator
            .update_booking(
                &id,
                BookingAmendment {
                    details: Some(BookingDetails::Maintenance {
                        category: "repair".into(),
                        priority: MaintenancePriority::Urgent,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.kind(), BookingKind::Maintenance);
        assert_eq!(
            coordinator.get_booking(&id).unwrap().kind(),
            BookingKind::Maintenance
        );
    }

    #[tokio::test]
    async fn test_delete_frees_machine() {
        let (_store, coordinator) = setup();
        let id = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap();

        coordinator.delete_booking(&id).await.unwrap();
        assert!(matches!(
            coordinator.get_booking(&id),
            Err(CoreError::BookingNotFound(_))
        ));
        assert!(matches!(
            coordinator.delete_booking(&id).await,
            Err(CoreError::BookingNotFound(_))
        ));

        let availability = coordinator
            .check_availability(&MachineId::new("pc-01"), &window((10, 0), (12, 0)))
            .unwrap();
        assert_eq!(availability, ConflictResult::NoConflict);
    }

    #[tokio::test]
    async fn test_unknown_booking_update() {
        let (_store, coordinator) = setup();
        let err = coordinator
            .update_booking(&BookingId::new(), BookingAmendment::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BookingNotFound(_)));
    }

    #[tokio::test]
    async fn test_check_availability_reports_blocker() {
        let (_store, coordinator) = setup();
        let id = coordinator
            .create_booking(maintenance_request(window((10, 0), (12, 0)), &["ps5-01"]))
            .await
            .unwrap();

        match coordinator
            .check_availability(&MachineId::new("ps5-01"), &window((11, 0), (11, 30)))
            .unwrap()
        {
            ConflictResult::Conflict(info) => assert_eq!(
                info.blocker,
                Blocker::Booking {
                    booking_id: id,
                    kind: BookingKind::Maintenance
                }
            ),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lock_timeout_surfaces_as_concurrency() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .upsert_machine(&Machine::new("pc-01", PlatformCategory::General))
            .unwrap();
        let locks = Arc::new(MachineLocks::new());
        let settings = BookingSettings {
            max_retries: 2,
            lock_timeout: Duration::from_millis(20),
            max_duration: None,
        };
        let coordinator = ReservationCoordinator::new(store.clone(), locks.clone(), settings);

        let _held = locks
            .acquire(&machines(&["pc-01"]), Duration::from_millis(100))
            .await
            .unwrap();

        let err = coordinator
            .create_booking(event_request(window((10, 0), (12, 0)), &["pc-01"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Concurrency { attempts: 3 }));
        assert!(store
            .bookings_for_machine(&MachineId::new("pc-01"))
            .unwrap()
            .is_empty());
    }
}
