//! Core data types for the relay
//!
//! - `records`: persisted captures, descriptions, generated images and the
//!   capture status state machine
//! - `events`: broadcast events and their wire payloads

mod events;
mod records;

pub use events::*;
pub use records::*;
