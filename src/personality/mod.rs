//! Agent personality model
//!
//! Profiles and traits announced by agents and aggregated by the
//! coordinator.

mod types;

pub use types::*;
