//! Trellis Core
//!
//! This crate provides an incremental, dependency-tracked computation
//! engine: a graph of mutable cells, lazily recomputed memos and
//! side-effecting reactions, kept consistent under arbitrary writes with
//! minimal recomputation.
//!
//! It implements:
//!
//! - Reactive primitives (cells, memos, reactions, roots)
//! - Push/pull dirtiness propagation with equality cutoff
//! - A flush scheduler that coalesces deferred reactions and skips redundant
//!   reruns
//! - Write batching
//! - An optional observer interface for inspectors and visualisers
//!
//! # Architecture
//!
//! - `graph`: Dependency graph arena and the flush scheduler's queues
//! - `reactive`: Reactive primitives, dependency tracking and the runtime
//! - `inspect`: Graph events and snapshots for external tooling
//! - `config`: Per-thread runtime configuration
//! - `error`: Error types
//!
//! The engine is single-threaded: each thread owns an independent runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{settled, Cell, Memo, Reaction, Root, Timing};
//!
//! let a = Cell::new(1);
//! let b = Cell::new(1);
//! let sum = Memo::new({
//!     let (a, b) = (a.clone(), b.clone());
//!     move || a.get() + b.get()
//! });
//!
//! let root = Root::new(|| {
//!     let sum = sum.clone();
//!     Reaction::new(Timing::Deferred, move || println!("sum: {}", sum.get())).unwrap();
//! });
//!
//! a.set(2);
//! b.set(2);
//! settled().await?;
//! // prints "sum: 4" once
//! root.destroy()?;
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod inspect;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use graph::{Flag, NodeId, NodeKind, Phase, Timing};
pub use inspect::{GraphEvent, GraphSnapshot, NodeSnapshot, Observer};
pub use reactive::{
    batch, settled, untrack, Cell, Cleanup, Memo, Reaction, Root, Runtime, Teardown,
};
