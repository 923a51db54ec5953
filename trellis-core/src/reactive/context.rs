//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! who owns any reaction created right now. This enables automatic dependency
//! tracking: when a cell or memo is read, the active collector gets an edge
//! to it.
//!
//! # Implementation
//!
//! The context is a small `Copy` value stored in the thread's runtime. Every
//! entry point that installs a new context (collecting a memo, running a
//! reaction body, running a root, untracking) goes through a [`ContextGuard`],
//! which snapshots the previous context and restores it when dropped. Nested
//! contexts therefore unwind correctly even if the computation panics.

use crate::graph::NodeId;

use super::runtime::{try_with_runtime, with_runtime};

/// The active collector and owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Context {
    /// Node that records a dependency on every tracked read.
    pub(crate) collector: Option<NodeId>,

    /// Reads are not recorded while set.
    pub(crate) untracked: bool,

    /// Root or reaction that adopts newly created reactions.
    pub(crate) owner: Option<NodeId>,
}

/// Restores the previous context when dropped.
pub(crate) struct ContextGuard {
    previous: Context,
}

impl ContextGuard {
    /// Apply `change` to the active context until the guard is dropped.
    pub(crate) fn install(change: impl FnOnce(&mut Context)) -> Self {
        let previous = with_runtime(|rt| {
            let previous = rt.context;
            change(&mut rt.context);
            previous
        });
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        try_with_runtime(|rt| rt.context = previous);
    }
}

/// Run `f` with `recorder` collecting every tracked read.
pub(crate) fn collect<R>(recorder: NodeId, f: impl FnOnce() -> R) -> R {
    let _guard = ContextGuard::install(|ctx| {
        ctx.collector = Some(recorder);
        ctx.untracked = false;
    });
    f()
}

/// Run `f` without recording any dependencies.
///
/// # Example
///
/// ```rust,ignore
/// Reaction::new(Timing::Immediate, move || {
///     // reruns when `a` changes, never when `b` does
///     let sum = a.get() + untrack(|| b.get());
///     println!("{sum}");
/// })?;
/// ```
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ContextGuard::install(|ctx| ctx.untracked = true);
    f()
}

/// Record that the active collector read `dep`.
pub(crate) fn track(dep: NodeId) {
    with_runtime(|rt| {
        if rt.context.untracked {
            return;
        }
        if let Some(collector) = rt.context.collector {
            rt.graph.link(dep, collector);
        }
    });
}
