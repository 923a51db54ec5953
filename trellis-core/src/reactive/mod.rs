//! Reactive Primitives
//!
//! This module implements the reactive system on top of the dependency
//! graph: cells, memos, reactions and the roots that own them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. Reading it inside a memo or a
//! reaction body records a dependency; writing a different value notifies
//! everything that read it.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates lazily,
//! on read, and only when something it read actually changed.
//!
//! ## Reactions
//!
//! A Reaction is a side-effecting computation that reruns when its
//! dependencies change, either synchronously (`Timing::Immediate`) or at the
//! next flush (`Timing::Deferred`). Reactions own the reactions their body
//! creates, and are themselves owned by a root or another reaction.
//!
//! ## Roots
//!
//! A Root is the top of an ownership tree. Destroying it tears down every
//! reaction underneath, innermost first.
//!
//! # Implementation Notes
//!
//! Each thread has its own runtime holding the graph, the active context and
//! the scheduler. Handles are thin: a cell or memo is an `Rc` around its node
//! id and value, a reaction or root is just the id.

mod batch;
mod cell;
mod context;
mod dirtiness;
mod memo;
mod reaction;
mod root;
mod runtime;

pub use batch::batch;
pub use cell::Cell;
pub use context::untrack;
pub use memo::Memo;
pub use reaction::{Cleanup, Reaction, Teardown};
pub use root::Root;
pub use runtime::{settled, Runtime};

pub use crate::graph::Timing;

pub(crate) use memo::Computation;
pub(crate) use reaction::ReactionBody;
