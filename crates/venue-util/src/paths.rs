//! Default paths for venue components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/venue/venue.toml` or `~/.config/venue/venue.toml`
//! - Data: `$XDG_DATA_HOME/venue` or `~/.local/share/venue`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const VENUE_CONFIG_ENV: &str = "VENUE_CONFIG";

/// Environment variable for overriding the data directory
pub const VENUE_DATA_DIR_ENV: &str = "VENUE_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "venue";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "venue.toml";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "venue.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$VENUE_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/venue/venue.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/venue/venue.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(VENUE_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$VENUE_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/venue` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/venue` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(VENUE_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking VENUE_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
