//! Knowledge handler pipeline
//!
//! Stages are plain functions that either pass a knowledge object on or stop
//! the chain with a reason. The processor runs them in a fixed order.

mod personality;

pub use personality::*;

use crate::protocol::{KnowledgeObject, NodeRid, RidType};

/// Why a knowledge object was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// External update targeting this node's own personality.
    SelfProtection,
    /// Contents failed validation.
    InvalidContents(String),
    /// Personality name already registered by another node.
    Conflict { existing: NodeRid },
    /// Event carried no contents.
    MissingContents,
    /// No stage handles this RID type.
    WrongType(RidType),
    /// The cache could not be consulted.
    Cache(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::SelfProtection => write!(f, "external update to own personality"),
            StopReason::InvalidContents(e) => write!(f, "invalid contents: {}", e),
            StopReason::Conflict { existing } => write!(f, "name owned by {}", existing),
            StopReason::MissingContents => write!(f, "missing contents"),
            StopReason::WrongType(t) => write!(f, "unhandled type {}", t),
            StopReason::Cache(e) => write!(f, "cache error: {}", e),
        }
    }
}

/// Result of a handler stage.
#[derive(Debug)]
pub enum Flow {
    Continue(KnowledgeObject),
    Stop(StopReason),
}

impl Flow {
    /// Run the next stage if this one continued.
    pub fn and_then(self, next: impl FnOnce(KnowledgeObject) -> Flow) -> Flow {
        match self {
            Flow::Continue(kobj) => next(kobj),
            stop => stop,
        }
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, Flow::Continue(_))
    }

    pub fn into_continue(self) -> Option<KnowledgeObject> {
        match self {
            Flow::Continue(kobj) => Some(kobj),
            Flow::Stop(_) => None,
        }
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        match self {
            Flow::Stop(reason) => Some(reason),
            Flow::Continue(_) => None,
        }
    }
}
