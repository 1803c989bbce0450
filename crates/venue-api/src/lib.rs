//! Domain types for venue
//!
//! This crate defines the vocabulary shared between the store, the core
//! and front ends:
//! - Machines and platform categories
//! - Bookings (events and maintenance windows) and their assignments
//! - Sessions, client balances and ledger results
//! - Conflict reports

mod conflict;
mod ledger;
mod types;

pub use conflict::*;
pub use ledger::*;
pub use types::*;
