//! Knowledge-network protocol
//!
//! Resource identifiers plus the event, bundle and payload types exchanged
//! between agents and the coordinator as JSON over HTTP.

mod messages;
mod rid;

pub use messages::*;
pub use rid::*;
