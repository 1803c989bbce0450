//! Machines and bookings

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use venue_util::{BookingId, ClientId, MachineId, StaffId, TimeWindow};

/// Returned when a textual enum value is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} '{value}'")]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// Station class; selects which balance a session debits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformCategory {
    General,
    Console,
    Specialized,
}

impl PlatformCategory {
    pub const ALL: [PlatformCategory; 3] = [
        PlatformCategory::General,
        PlatformCategory::Console,
        PlatformCategory::Specialized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformCategory::General => "general",
            PlatformCategory::Console => "console",
            PlatformCategory::Specialized => "specialized",
        }
    }
}

impl fmt::Display for PlatformCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" | "pc" => Ok(PlatformCategory::General),
            "console" => Ok(PlatformCategory::Console),
            "specialized" | "special" => Ok(PlatformCategory::Specialized),
            other => Err(ParseEnumError::new("platform category", other)),
        }
    }
}

/// A physical station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub category: PlatformCategory,
    pub label: Option<String>,
}

impl Machine {
    pub fn new(id: impl Into<MachineId>, category: PlatformCategory) -> Self {
        Self {
            id: id.into(),
            category,
            label: None,
        }
    }
}

/// Activity a booking reserves machines for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Event,
    Maintenance,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Event => "event",
            BookingKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "event" => Ok(BookingKind::Event),
            "maintenance" => Ok(BookingKind::Maintenance),
            other => Err(ParseEnumError::new("booking kind", other)),
        }
    }
}

/// Urgency of a maintenance window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl FromStr for MaintenancePriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(MaintenancePriority::Low),
            "normal" => Ok(MaintenancePriority::Normal),
            "high" => Ok(MaintenancePriority::High),
            "urgent" => Ok(MaintenancePriority::Urgent),
            other => Err(ParseEnumError::new("maintenance priority", other)),
        }
    }
}

/// Lifecycle of a customer event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

impl FromStr for EventStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(EventStatus::Scheduled),
            "confirmed" => Ok(EventStatus::Confirmed),
            "cancelled" | "canceled" => Ok(EventStatus::Cancelled),
            "completed" => Ok(EventStatus::Completed),
            other => Err(ParseEnumError::new("event status", other)),
        }
    }
}

/// Kind-specific booking payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingDetails {
    Event {
        name: String,
        #[serde(default)]
        status: EventStatus,
        #[serde(default)]
        customer: Option<ClientId>,
    },
    Maintenance {
        category: String,
        #[serde(default)]
        priority: MaintenancePriority,
    },
}

impl BookingDetails {
    pub fn kind(&self) -> BookingKind {
        match self {
            BookingDetails::Event { .. } => BookingKind::Event,
            BookingDetails::Maintenance { .. } => BookingKind::Maintenance,
        }
    }

    /// Short human label (event name or maintenance category)
    pub fn label(&self) -> &str {
        match self {
            BookingDetails::Event { name, .. } => name,
            BookingDetails::Maintenance { category, .. } => category,
        }
    }
}

/// A reservation of one or more machines for a time window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub window: TimeWindow,
    pub details: BookingDetails,
    pub created_by: StaffId,
    pub created_at: DateTime<Local>,
    /// Machines this booking holds, sorted
    pub machine_ids: Vec<MachineId>,
}

impl Booking {
    pub fn kind(&self) -> BookingKind {
        self.details.kind()
    }

    pub fn assignments(&self) -> Vec<MachineAssignment> {
        self.machine_ids
            .iter()
            .map(|machine_id| MachineAssignment {
                booking_id: self.id,
                machine_id: machine_id.clone(),
            })
            .collect()
    }
}

/// Join row between a booking and one machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineAssignment {
    pub booking_id: BookingId,
    pub machine_id: MachineId,
}
