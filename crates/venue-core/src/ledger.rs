//! Session ledger: opening and closing machine sessions against minute balances

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use venue_api::{ClientBalance, LedgerResult, OpenedSession, PlatformCategory, Session};
use venue_config::SessionSettings;
use venue_store::{AuditEvent, AuditEventType, SessionSettlement, Store, StoreError};
use venue_util::{elapsed_whole_minutes, AccessToken, ClientId, MachineId, SessionId};

use crate::{ConflictDetector, CoreError, CoreResult, MachineLocks, TokenClaims, TokenStore};

/// Reason recorded when a session is closed without one
pub const DEFAULT_END_REASON: &str = "closed";

pub struct SessionLedger {
    store: Arc<dyn Store>,
    detector: ConflictDetector,
    locks: Arc<MachineLocks>,
    tokens: Arc<dyn TokenStore>,
    settings: SessionSettings,
    lock_timeout: Duration,
}

impl SessionLedger {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<MachineLocks>,
        tokens: Arc<dyn TokenStore>,
        settings: SessionSettings,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            detector: ConflictDetector::new(store.clone()),
            store,
            locks,
            tokens,
            settings,
            lock_timeout,
        }
    }

    /// Start a session for `client_id` on `machine_id` at `now`.
    pub async fn open_session(
        &self,
        client_id: &ClientId,
        machine_id: &MachineId,
        now: DateTime<Local>,
    ) -> CoreResult<OpenedSession> {
        let balance = self
            .store
            .get_balance(client_id)?
            .ok_or_else(|| CoreError::ClientNotFound(client_id.clone()))?;
        let machine = self
            .store
            .get_machine(machine_id)?
            .ok_or_else(|| CoreError::MachineNotFound(machine_id.clone()))?;

        let _guards = self
            .locks
            .acquire(std::slice::from_ref(machine_id), self.lock_timeout)
            .await?;

        if let Some(open) = self.store.open_session_for_client(client_id)? {
            return Err(CoreError::SessionAlreadyOpen {
                client_id: client_id.clone(),
                session_id: open.id,
            });
        }

        if let Some(info) = self.detector.machine_busy_at(machine_id, &now)? {
            return Err(CoreError::MachineBusy(Box::new(info)));
        }

        if self.settings.require_balance && balance.minutes(machine.category) <= 0 {
            return Err(CoreError::Validation(format!(
                "client {} has no {} minutes left",
                client_id, machine.category
            )));
        }

        let session = Session {
            id: SessionId::new(),
            client_id: client_id.clone(),
            machine_id: machine_id.clone(),
            started_at: now,
            ended_at: None,
            end_reason: None,
        };

        match self.store.insert_session(&session) {
            Ok(()) => {}
            // Lost a race with another terminal opening a session for this client
            Err(StoreError::Constraint(_)) => {
                let open = self.store.open_session_for_client(client_id)?;
                return Err(match open {
                    Some(open) => CoreError::SessionAlreadyOpen {
                        client_id: client_id.clone(),
                        session_id: open.id,
                    },
                    None => CoreError::Concurrency { attempts: 1 },
                });
            }
            // Another process occupied the machine after our check
            Err(StoreError::Overlap { .. }) => {
                return Err(match self.detector.machine_busy_at(machine_id, &now)? {
                    Some(info) => CoreError::MachineBusy(Box::new(info)),
                    None => CoreError::Concurrency { attempts: 1 },
                });
            }
            Err(e) => return Err(e.into()),
        }

        let token = self.tokens.create(session.id, client_id, now);

        info!(
            session_id = %session.id,
            client_id = %client_id,
            machine_id = %machine_id,
            category = %machine.category,
            "Session opened"
        );

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::SessionOpened {
            session_id: session.id,
            client_id: client_id.clone(),
            machine_id: machine_id.clone(),
        }));

        Ok(OpenedSession {
            session_id: session.id,
            token,
            started_at: now,
        })
    }

    pub fn close_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Local>,
    ) -> CoreResult<LedgerResult> {
        self.close_session_with_reason(session_id, now, DEFAULT_END_REASON)
    }

    /// Close an open session and debit its whole minutes from the balance of
    /// the machine's category.
    ///
    /// The balance never drops below zero. Minutes that could not be charged
    /// are reported as `unbilled_minutes`.
    pub fn close_session_with_reason(
        &self,
        session_id: &SessionId,
        now: DateTime<Local>,
        reason: &str,
    ) -> CoreResult<LedgerResult> {
        let session = self
            .store
            .get_session(session_id)?
            .filter(Session::is_open)
            .ok_or(CoreError::SessionNotFound(*session_id))?;

        let elapsed = elapsed_whole_minutes(&session.started_at, &now).ok_or_else(|| {
            CoreError::Validation(format!(
                "session {} cannot end before it started at {}",
                session_id, session.started_at
            ))
        })?;

        let category = self.category_of(&session.machine_id)?;

        let settlement = SessionSettlement {
            session_id: *session_id,
            client_id: session.client_id.clone(),
            category,
            ended_at: now,
            end_reason: Some(reason.to_string()),
            minutes: elapsed,
        };
        let change = match self.store.settle_session(&settlement) {
            Ok(change) => change,
            Err(StoreError::NotFound(_)) => return Err(CoreError::SessionNotFound(*session_id)),
            Err(e) => return Err(e.into()),
        };

        let debited = change.before - change.after;
        let unbilled = elapsed - debited;
        if unbilled > 0 {
            warn!(
                session_id = %session_id,
                client_id = %session.client_id,
                category = %category,
                unbilled_minutes = unbilled,
                "Session ran past the client's balance"
            );
        }

        self.tokens.invalidate_session(session_id);

        info!(
            session_id = %session_id,
            client_id = %session.client_id,
            elapsed_minutes = elapsed,
            balance_after = change.after,
            reason,
            "Session closed"
        );

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::SessionClosed {
            session_id: *session_id,
            client_id: session.client_id.clone(),
            category,
            elapsed_minutes: elapsed,
            debited_minutes: debited,
            unbilled_minutes: unbilled,
        }));

        Ok(LedgerResult {
            session_id: *session_id,
            client_id: session.client_id,
            machine_id: session.machine_id,
            category,
            started_at: session.started_at,
            ended_at: now,
            elapsed_minutes: elapsed,
            debited_minutes: debited,
            unbilled_minutes: unbilled,
            balance_before: change.before,
            balance_after: change.after,
        })
    }

    /// Top up one category. Creates the client when missing.
    pub fn credit_minutes(
        &self,
        client_id: &ClientId,
        category: PlatformCategory,
        minutes: i64,
    ) -> CoreResult<ClientBalance> {
        if minutes <= 0 {
            return Err(CoreError::Validation(format!(
                "credit must be a positive number of minutes, got {}",
                minutes
            )));
        }

        let balance = self.store.credit_balance(client_id, category, minutes)?;

        info!(
            client_id = %client_id,
            category = %category,
            minutes,
            balance = balance.minutes(category),
            "Minutes credited"
        );

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::BalanceCredited {
            client_id: client_id.clone(),
            category,
            minutes,
        }));

        Ok(balance)
    }

    pub fn balance(&self, client_id: &ClientId) -> CoreResult<ClientBalance> {
        self.store
            .get_balance(client_id)?
            .ok_or_else(|| CoreError::ClientNotFound(client_id.clone()))
    }

    /// Create a zeroed balance for a new client. Existing balances are kept.
    pub fn register_client(&self, client_id: &ClientId) -> CoreResult<ClientBalance> {
        Ok(self.store.ensure_client(client_id)?)
    }

    /// The client's open session, if any
    pub fn active_session(&self, client_id: &ClientId) -> CoreResult<Option<Session>> {
        Ok(self.store.open_session_for_client(client_id)?)
    }

    /// Resolve an access token to its session, if still valid
    pub fn validate_token(&self, token: &AccessToken, now: DateTime<Local>) -> Option<TokenClaims> {
        self.tokens.get(token, now)
    }

    pub fn sweep_tokens(&self, now: DateTime<Local>) -> usize {
        self.tokens.sweep(now)
    }

    fn category_of(&self, machine_id: &MachineId) -> CoreResult<PlatformCategory> {
        self.store
            .get_machine(machine_id)?
            .map(|m| m.category)
            .ok_or_else(|| CoreError::MachineNotFound(machine_id.clone()))
    }
}
