//! Shared utilities for venue
//!
//! This crate provides:
//! - ID types (MachineId, ClientId, StaffId, BookingId, SessionId, AccessToken)
//! - The interval model (`TimeWindow` and its overlap predicate)
//! - Clock helpers (mockable `now()`, elapsed minutes, display formatting)
//! - Default paths for config and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
