//! Personality network
//!
//! Agents announce a typed, versioned personality into a small knowledge
//! network. A coordinator validates incoming personalities through an
//! ordered handler pipeline and exposes them as a resource and tool
//! registry.

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod node;
pub mod personality;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod version;

pub use error::{Error, Result};
