//! Error Types
//!
//! Every error in this crate signals a broken invariant in caller code rather
//! than a transient condition, so nothing here is ever retried.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors raised by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// The reaction or root was already destroyed (or its handle is stale).
    #[error("node {0:?} has already been destroyed")]
    AlreadyDestroyed(NodeId),

    /// A reaction was constructed with no live root or reaction to own it.
    #[error("cannot create a reaction outside of a root or reaction")]
    NoOwner,

    /// Walking a reaction's parent chain did not end at a root.
    #[error("reaction {0:?} is not owned by any root")]
    Orphaned(NodeId),

    /// A rerun was requested while the reaction's body was executing.
    #[error("reaction {0:?} is already running")]
    Reentrant(NodeId),

    /// `Runtime::step` was called outside of stepping mode.
    #[error("stepping mode is disabled")]
    SteppingDisabled,

    /// `Runtime::step` was called with no scheduler work pending.
    #[error("no scheduler step is pending")]
    NoPendingStep,

    /// A flush did not settle within the configured step budget.
    #[error("flush did not settle within {0} steps")]
    FlushLimitExceeded(usize),

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;
