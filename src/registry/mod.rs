//! Coordinator-side personality registry

mod adapter;

pub use adapter::*;
