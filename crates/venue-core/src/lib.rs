//! Reservation and ledger core for venue
//!
//! This crate contains:
//! - Conflict detection over bookings and open sessions
//! - The reservation coordinator (create, amend, cancel bookings atomically)
//! - The session ledger (open and close sessions, debit minute balances)
//! - Session access tokens with a time-to-live
//! - The per-machine lock table shared by all writers

mod conflict;
mod coordinator;
mod error;
mod ledger;
mod locks;
mod tokens;

pub use conflict::*;
pub use coordinator::*;
pub use error::*;
pub use ledger::*;
pub use locks::*;
pub use tokens::*;

use std::sync::Arc;
use tracing::info;
use venue_config::VenueConfig;
use venue_store::{AuditEvent, AuditEventType, Store};

/// Coordinator and ledger wired to one store and one lock table
pub struct VenueCore {
    pub coordinator: ReservationCoordinator,
    pub ledger: SessionLedger,
}

impl VenueCore {
    pub fn new(config: &VenueConfig, store: Arc<dyn Store>) -> Self {
        let tokens = Arc::new(MemoryTokenStore::new(config.sessions.token_ttl));
        Self::with_token_store(config, store, tokens)
    }

    pub fn with_token_store(
        config: &VenueConfig,
        store: Arc<dyn Store>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let locks = Arc::new(MachineLocks::new());

        info!(
            machine_count = config.machines.len(),
            max_retries = config.bookings.max_retries,
            require_balance = config.sessions.require_balance,
            "Venue core initialized"
        );

        Self {
            coordinator: ReservationCoordinator::new(
                store.clone(),
                locks.clone(),
                config.bookings.clone(),
            ),
            ledger: SessionLedger::new(
                store,
                locks,
                tokens,
                config.sessions.clone(),
                config.bookings.lock_timeout,
            ),
        }
    }

    /// Bring the store's machine inventory in line with the configuration.
    ///
    /// Returns how many machines were added or changed. Machines no longer
    /// configured are left in place.
    pub fn sync_machines(config: &VenueConfig, store: &dyn Store) -> CoreResult<usize> {
        let existing = store.list_machines()?;

        let mut changed = 0;
        for machine in &config.machines {
            if !existing.contains(machine) {
                store.upsert_machine(machine)?;
                changed += 1;
            }
        }

        if changed > 0 {
            info!(changed, machine_count = config.machines.len(), "Machine inventory synced");
            let _ = store.append_audit(AuditEvent::new(AuditEventType::MachinesLoaded {
                machine_count: config.machines.len(),
            }));
        }

        Ok(changed)
    }
}
