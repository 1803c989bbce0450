//! Sessions and minute balances

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use venue_util::{AccessToken, ClientId, MachineId, SessionId, TimeWindow};

use crate::PlatformCategory;

/// A client's continuous use of one machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub client_id: ClientId,
    pub machine_id: MachineId,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub end_reason: Option<String>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Occupied window; open sessions extend to +infinity.
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.started_at,
            end: self.ended_at,
        }
    }
}

/// Remaining minutes per platform category for one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Minutes {
    pub general: i64,
    pub console: i64,
    pub specialized: i64,
}

impl Minutes {
    pub fn get(&self, category: PlatformCategory) -> i64 {
        match category {
            PlatformCategory::General => self.general,
            PlatformCategory::Console => self.console,
            PlatformCategory::Specialized => self.specialized,
        }
    }

    pub fn get_mut(&mut self, category: PlatformCategory) -> &mut i64 {
        match category {
            PlatformCategory::General => &mut self.general,
            PlatformCategory::Console => &mut self.console,
            PlatformCategory::Specialized => &mut self.specialized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientBalance {
    pub client_id: ClientId,
    pub minutes: Minutes,
}

impl ClientBalance {
    pub fn empty(client_id: ClientId) -> Self {
        Self {
            client_id,
            minutes: Minutes::default(),
        }
    }

    pub fn minutes(&self, category: PlatformCategory) -> i64 {
        self.minutes.get(category)
    }
}

/// Handed back to the caller when a session starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedSession {
    pub session_id: SessionId,
    pub token: AccessToken,
    pub started_at: DateTime<Local>,
}

/// Accounting outcome of closing a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerResult {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub machine_id: MachineId,
    pub category: PlatformCategory,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    /// Whole minutes between start and close, truncated
    pub elapsed_minutes: i64,
    /// Minutes actually removed from the balance
    pub debited_minutes: i64,
    /// Elapsed minutes the balance could not cover; discarded, not kept as debt
    pub unbilled_minutes: i64,
    pub balance_before: i64,
    pub balance_after: i64,
}
