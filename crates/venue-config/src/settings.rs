//! Validated settings structures

use crate::schema::{RawBookingSettings, RawConfig, RawMachine, RawServiceConfig, RawSessionSettings};
use std::path::PathBuf;
use std::time::Duration;
use venue_api::{Machine, PlatformCategory};
use venue_util::{default_data_dir, MachineId, DATABASE_FILENAME};

/// Validated configuration ready for use by the core
#[derive(Debug, Clone, Default)]
pub struct VenueConfig {
    pub service: ServiceConfig,
    pub bookings: BookingSettings,
    pub sessions: SessionSettings,
    pub machines: Vec<Machine>,
}

impl VenueConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            bookings: BookingSettings::from_raw(raw.bookings),
            sessions: SessionSettings::from_raw(raw.sessions),
            machines: raw.machines.into_iter().map(convert_machine).collect(),
        }
    }

    /// Get machine by ID
    pub fn get_machine(&self, id: &MachineId) -> Option<&Machine> {
        self.machines.iter().find(|m| &m.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let data_dir = raw.data_dir.unwrap_or_else(default_data_dir);
        let database_path = raw
            .database_path
            .unwrap_or_else(|| data_dir.join(DATABASE_FILENAME));

        Self {
            data_dir,
            database_path,
            busy_timeout: raw
                .busy_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BUSY_TIMEOUT),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Reservation coordinator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSettings {
    /// Retries after a serialization failure
    pub max_retries: u32,
    pub lock_timeout: Duration,
    /// Longest allowed closed window. None means unlimited.
    pub max_duration: Option<Duration>,
}

impl BookingSettings {
    fn from_raw(raw: RawBookingSettings) -> Self {
        Self {
            max_retries: raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            lock_timeout: raw
                .lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LOCK_TIMEOUT),
            // 0 means unlimited, None means the two-week default
            max_duration: match raw.max_duration_hours {
                Some(0) => None,
                Some(hours) => Some(Duration::from_secs(hours * 3600)),
                None => Some(DEFAULT_MAX_DURATION),
            },
        }
    }
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self::from_raw(RawBookingSettings::default())
    }
}

/// Session ledger settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub token_ttl: Duration,
    pub require_balance: bool,
}

impl SessionSettings {
    fn from_raw(raw: RawSessionSettings) -> Self {
        Self {
            token_ttl: raw
                .token_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TOKEN_TTL),
            require_balance: raw.require_balance.unwrap_or(true),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_raw(RawSessionSettings::default())
    }
}

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(2000);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(14 * 24 * 3600);
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(12 * 3600);

fn convert_machine(raw: RawMachine) -> Machine {
    // Category was checked by validate_config
    let category = raw
        .category
        .parse::<PlatformCategory>()
        .unwrap_or(PlatformCategory::General);

    Machine {
        id: MachineId::new(raw.id),
        category,
        label: raw.label,
    }
}
