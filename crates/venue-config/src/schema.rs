//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Process-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Reservation coordinator tuning
    #[serde(default)]
    pub bookings: RawBookingSettings,

    /// Session ledger tuning
    #[serde(default)]
    pub sessions: RawSessionSettings,

    /// Stations on the floor
    #[serde(default)]
    pub machines: Vec<RawMachine>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store (default: $XDG_DATA_HOME/venue)
    pub data_dir: Option<PathBuf>,

    /// Explicit database file; overrides data_dir/venue.db
    pub database_path: Option<PathBuf>,

    /// How long SQLite waits on a locked database before reporting busy
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBookingSettings {
    /// Retries after a serialization failure before giving up
    pub max_retries: Option<u32>,

    /// Upper bound on waiting for per-machine locks
    pub lock_timeout_ms: Option<u64>,

    /// Longest closed booking window in hours; 0 means unlimited
    pub max_duration_hours: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSessionSettings {
    /// Lifetime of access tokens issued at session open
    pub token_ttl_seconds: Option<u64>,

    /// Refuse to open a session when the category balance is zero
    pub require_balance: Option<bool>,
}

/// Raw machine definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMachine {
    /// Unique stable ID
    pub id: String,

    /// "general", "console" or "specialized"
    pub category: String,

    /// Display label
    pub label: Option<String>,
}
