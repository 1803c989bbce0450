//! Per-machine lock table

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use venue_util::MachineId;

use crate::{CoreError, CoreResult};

/// One async mutex per machine, created on first use.
///
/// Shared between the coordinator and the ledger so that every write that
/// can change a machine's occupancy is serialized per machine.
#[derive(Default)]
pub struct MachineLocks {
    locks: DashMap<MachineId, Arc<Mutex<()>>>,
}

/// Held locks; released on drop
pub struct MachineGuards {
    machine_ids: Vec<MachineId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl MachineGuards {
    pub fn machine_ids(&self) -> &[MachineId] {
        &self.machine_ids
    }
}

impl MachineLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, machine_id: &MachineId) -> Arc<Mutex<()>> {
        self.locks
            .entry(machine_id.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Lock every machine in `machine_ids`.
    ///
    /// Ids are de-duplicated and taken in sorted order so two callers with
    /// overlapping sets cannot deadlock. Locks already taken are released if
    /// the timeout expires.
    pub async fn acquire(
        &self,
        machine_ids: &[MachineId],
        timeout: Duration,
    ) -> CoreResult<MachineGuards> {
        let mut ordered = machine_ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let acquire_all = async {
            let mut guards = Vec::with_capacity(ordered.len());
            for machine_id in &ordered {
                guards.push(self.lock_for(machine_id).lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(timeout, acquire_all).await {
            Ok(guards) => {
                debug!(machine_count = ordered.len(), "Machine locks acquired");
                Ok(MachineGuards {
                    machine_ids: ordered,
                    _guards: guards,
                })
            }
            Err(_) => {
                warn!(
                    machines = ?ordered,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for machine locks"
                );
                Err(CoreError::Concurrency { attempts: 1 })
            }
        }
    }

    /// Number of machines that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<MachineId> {
        names.iter().map(|n| MachineId::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_acquire_sorts_and_dedups() {
        let locks = MachineLocks::new();
        let guards = locks
            .acquire(&ids(&["pc-02", "pc-01", "pc-02"]), Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(guards.machine_ids(), ids(&["pc-01", "pc-02"]).as_slice());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_sets_wait() {
        let locks = MachineLocks::new();
        let held = locks
            .acquire(&ids(&["pc-01"]), Duration::from_millis(100))
            .await
            .unwrap();

        let err = locks
            .acquire(&ids(&["pc-02", "pc-01"]), Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(err.is_retryable());

        // The timed-out attempt left nothing locked
        let _other = locks
            .acquire(&ids(&["pc-02"]), Duration::from_millis(50))
            .await
            .unwrap();

        drop(held);
        assert!(locks
            .acquire(&ids(&["pc-01"]), Duration::from_millis(50))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_disjoint_sets_proceed() {
        let locks = MachineLocks::new();
        let _a = locks
            .acquire(&ids(&["pc-01"]), Duration::from_millis(50))
            .await
            .unwrap();
        let _b = locks
            .acquire(&ids(&["ps5-01"]), Duration::from_millis(50))
            .await
            .unwrap();
    }
}
