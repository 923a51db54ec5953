//! Dirtiness Propagation
//!
//! Keeping derived values fresh happens in two phases.
//!
//! # Push
//!
//! A cell write that changes the value walks outward through subscriber
//! edges. Direct subscribers are flagged `Dirty`; everything further away is
//! only `MaybeDirty`, since an intermediate memo may recompute to the same
//! value. Reactions are leaves of the walk: they are queued with the severity
//! they were reached with and the walk stops there.
//!
//! # Pull
//!
//! A read of a non-clean memo walks back toward the sources. Dirty memos are
//! recomputed; maybe-dirty memos check their dependencies in order, and
//! become dirty the moment one of them recomputes to a different value. A
//! memo whose recompute yields an equal value stops propagation there
//! (cutoff).
//!
//! Both walks run on an explicit stack, so dependency chain depth is bounded
//! by heap rather than by the call stack.

use smallvec::SmallVec;
use tracing::trace;

use crate::graph::{Flag, NodeId, NodeKind};
use crate::inspect::GraphEvent;

use super::batch::batch;
use super::runtime::{with_runtime, RuntimeState};

/// How far a node is from the write that reached it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    /// A direct subscriber of the written cell (or of a memo that was just
    /// recomputed to a new value).
    Initial,

    /// Reached through at least one memo.
    Secondary,
}

impl Severity {
    fn flag(self) -> Flag {
        match self {
            Severity::Initial => Flag::Dirty,
            Severity::Secondary => Flag::MaybeDirty,
        }
    }
}

impl RuntimeState {
    /// A cell's value changed.
    pub(crate) fn propagate_write(&mut self, cell: NodeId) {
        self.graph.emit(GraphEvent::ValueWritten { id: cell });
        self.mark_subscribers(cell, Severity::Initial);
    }

    /// A memo recomputed to a new value.
    pub(crate) fn mark_subscribers_dirty(&mut self, memo: NodeId) {
        self.mark_subscribers(memo, Severity::Initial);
    }

    fn mark_subscribers(&mut self, id: NodeId, severity: Severity) {
        // Reversed so subscribers are visited in insertion order.
        let mut stack: Vec<(NodeId, Severity)> = self
            .graph
            .subscribers(id)
            .into_iter()
            .rev()
            .map(|subscriber| (subscriber, severity))
            .collect();

        while let Some((node, severity)) = stack.pop() {
            self.mark_dirty(node, severity, &mut stack);
        }
    }

    fn mark_dirty(&mut self, id: NodeId, severity: Severity, stack: &mut Vec<(NodeId, Severity)>) {
        let (kind, flag) = match self.graph.get(id) {
            Some(node) if !node.destroyed => (node.kind(), node.flag),
            _ => return,
        };

        match kind {
            NodeKind::Memo => {
                match (flag, severity) {
                    (Flag::Dirty, _) | (Flag::MaybeDirty, Severity::Secondary) => return,
                    _ => {}
                }
                trace!(?id, ?severity, "memo marked");
                self.graph.set_flag(id, severity.flag());
                stack.extend(
                    self.graph
                        .subscribers(id)
                        .into_iter()
                        .rev()
                        .map(|subscriber| (subscriber, Severity::Secondary)),
                );
            }
            NodeKind::Reaction => self.enqueue_reaction(id, severity.flag()),
            NodeKind::Cell | NodeKind::Root => {}
        }
    }
}

/// Recompute a memo. Returns true when its value changed, in which case its
/// subscribers have been marked dirty.
pub(crate) fn recompute(id: NodeId) -> bool {
    let computation = with_runtime(|rt| {
        let computation = rt.graph.get(id)?.computation()?;
        rt.graph.disconnect(id);
        Some(computation)
    });
    let Some(computation) = computation else {
        return false;
    };

    let changed = computation.recompute(id);
    trace!(?id, changed, "memo recomputed");

    let notify = with_runtime(|rt| {
        rt.graph.set_flag(id, Flag::Clean);
        changed && rt.graph.get(id).is_some_and(|node| !node.subscribers.is_empty())
    });
    if notify {
        batch(|| with_runtime(|rt| rt.mark_subscribers_dirty(id)));
    }
    changed
}

struct Frame {
    id: NodeId,
    deps: SmallVec<[NodeId; 8]>,
    next: usize,
}

fn frame(id: NodeId) -> Option<Frame> {
    with_runtime(|rt| {
        let node = rt.graph.get(id)?;
        if node.kind() != NodeKind::Memo || node.flag == Flag::Clean {
            return None;
        }
        Some(Frame {
            id,
            deps: node.deps.iter().copied().collect(),
            next: 0,
        })
    })
}

/// Bring a memo up to date. Returns true when it was recomputed to a new
/// value.
pub(crate) fn refresh(id: NodeId) -> bool {
    let mut stack: Vec<Frame> = frame(id).into_iter().collect();
    let mut changed = false;

    while let Some(top) = stack.last_mut() {
        let current = top.id;
        let flag = with_runtime(|rt| rt.graph.get(current).map(|node| node.flag));

        match flag {
            None | Some(Flag::Clean) => {
                stack.pop();
            }
            Some(Flag::Dirty) => {
                stack.pop();
                let recomputed = recompute(current);
                if stack.is_empty() {
                    changed = recomputed;
                }
            }
            Some(Flag::MaybeDirty) => match top.deps.get(top.next).copied() {
                Some(dep) => {
                    top.next += 1;
                    // A dep that recomputes to a new value flags `current`
                    // dirty, which the next iteration picks up.
                    if let Some(dep_frame) = frame(dep) {
                        stack.push(dep_frame);
                    }
                }
                None => {
                    with_runtime(|rt| rt.graph.set_flag(current, Flag::Clean));
                    stack.pop();
                }
            },
        }
    }
    changed
}

/// Resolve whether `id` changed. Cells are never stale, so only memos can
/// report `Dirty`.
pub(crate) fn check_dirty(id: NodeId) -> Flag {
    if refresh(id) {
        Flag::Dirty
    } else {
        Flag::Clean
    }
}

/// `Dirty` as soon as any recorded dependency of `reaction` resolves dirty.
pub(crate) fn process_deps_dirtiness(reaction: NodeId) -> Flag {
    let deps = with_runtime(|rt| rt.graph.deps(reaction));
    for dep in deps {
        if check_dirty(dep) == Flag::Dirty {
            return Flag::Dirty;
        }
    }
    Flag::Clean
}
