//! Configuration validation

use crate::schema::{RawConfig, RawMachine};
use std::collections::HashSet;
use thiserror::Error;
use venue_api::PlatformCategory;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Machine '{machine_id}': {message}")]
    MachineError { machine_id: String, message: String },

    #[error("Duplicate machine ID: {0}")]
    DuplicateMachineId(String),

    #[error("Setting '{setting}': {message}")]
    SettingError {
        setting: &'static str,
        message: String,
    },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    for machine in &config.machines {
        if !seen_ids.insert(&machine.id) {
            errors.push(ValidationError::DuplicateMachineId(machine.id.clone()));
        }
    }

    for machine in &config.machines {
        errors.extend(validate_machine(machine));
    }

    if config.bookings.lock_timeout_ms == Some(0) {
        errors.push(ValidationError::SettingError {
            setting: "bookings.lock_timeout_ms",
            message: "must be greater than zero".into(),
        });
    }

    if config.sessions.token_ttl_seconds == Some(0) {
        errors.push(ValidationError::SettingError {
            setting: "sessions.token_ttl_seconds",
            message: "must be greater than zero".into(),
        });
    }

    if config.bookings.max_retries.is_some_and(|r| r > MAX_RETRIES_CEILING) {
        errors.push(ValidationError::SettingError {
            setting: "bookings.max_retries",
            message: format!("must be at most {}", MAX_RETRIES_CEILING),
        });
    }

    errors
}

/// Retries are meant to absorb short contention, not to spin.
const MAX_RETRIES_CEILING: u32 = 10;

fn validate_machine(machine: &RawMachine) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if machine.id.trim().is_empty() {
        errors.push(ValidationError::MachineError {
            machine_id: machine.id.clone(),
            message: "id cannot be empty".into(),
        });
    }

    if let Err(e) = machine.category.parse::<PlatformCategory>() {
        errors.push(ValidationError::MachineError {
            machine_id: machine.id.clone(),
            message: e.to_string(),
        });
    }

    errors
}
