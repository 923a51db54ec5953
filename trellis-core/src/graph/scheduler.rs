//! Flush Scheduler
//!
//! The scheduler owns the queues of deferred reactions and decides, one unit
//! of work at a time, what the next flush step is.
//!
//! # Algorithm
//!
//! Each flush cycle moves through these phases:
//!
//! 1. `AwaitingFlush`: something was enqueued and a flush is scheduled.
//! 2. `ProcessingMaybes`: take one maybe-dirty reaction and resolve it by
//!    pulling on its dependencies. Confirmed reactions move to the dirty set,
//!    false alarms are dropped.
//! 3. `OrganisingEffectTree`: merge previously organised reactions back into
//!    the dirty set and drop every reaction whose ancestor is also dirty.
//! 4. `ApplyingEffects`: rerun one organised reaction. A rerun may enqueue
//!    more work, which loops back to step 1.
//! 5. `Done`: all queues are empty; settle waiters are released.
//!
//! Stepping one unit at a time keeps the machine interleavable with an
//! external step debugger.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::trace;

use super::node::{Flag, NodeId};
use super::Graph;

/// Phase of the flush state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Done,
    AwaitingFlush,
    ProcessingMaybes,
    OrganisingEffectTree,
    ApplyingEffects,
}

/// The unit of work chosen for the next step.
pub(crate) enum Step {
    /// Queues are empty; release these waiters.
    Settle(Vec<oneshot::Sender<()>>),
    /// Resolve whether this maybe-dirty reaction must rerun.
    ResolveMaybe(NodeId),
    /// The dirty set was organised; nothing else to do this step.
    Organise,
    /// Rerun this reaction.
    Apply(NodeId),
}

impl Step {
    pub(crate) fn phase(&self) -> Phase {
        match self {
            Step::Settle(_) => Phase::Done,
            Step::ResolveMaybe(_) => Phase::ProcessingMaybes,
            Step::Organise => Phase::OrganisingEffectTree,
            Step::Apply(_) => Phase::ApplyingEffects,
        }
    }
}

/// Queues of deferred reactions awaiting the next flush.
pub(crate) struct Scheduler {
    maybe: IndexSet<NodeId>,
    dirty: IndexSet<NodeId>,
    organised: IndexSet<NodeId>,
    phase: Phase,
    flush_scheduled: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            maybe: IndexSet::new(),
            dirty: IndexSet::new(),
            organised: IndexSet::new(),
            phase: Phase::Done,
            flush_scheduled: false,
            waiters: Vec::new(),
        }
    }

    /// Queue a reaction with the given severity and schedule a flush.
    ///
    /// A reaction is never in both the maybe and dirty sets: a dirty entry
    /// absorbs a later maybe, and a dirty enqueue promotes a maybe entry.
    pub(crate) fn enqueue(&mut self, id: NodeId, flag: Flag) {
        match flag {
            Flag::MaybeDirty => {
                if !self.dirty.contains(&id) {
                    self.maybe.insert(id);
                }
            }
            Flag::Dirty => {
                self.maybe.shift_remove(&id);
                self.dirty.insert(id);
            }
            Flag::Clean => return,
        }
        self.flush_scheduled = true;
    }

    /// Outcome of a `ResolveMaybe` step.
    pub(crate) fn confirm(&mut self, id: NodeId, dirty: bool) {
        self.maybe.shift_remove(&id);
        if dirty {
            self.dirty.insert(id);
        }
    }

    /// Drop a destroyed reaction from every queue.
    pub(crate) fn forget(&mut self, id: NodeId) {
        self.maybe.shift_remove(&id);
        self.dirty.shift_remove(&id);
        self.organised.shift_remove(&id);
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.maybe.is_empty() && self.dirty.is_empty() && self.organised.is_empty()
    }

    pub(crate) fn is_queued(&self, id: NodeId) -> bool {
        self.maybe.contains(&id) || self.dirty.contains(&id) || self.organised.contains(&id)
    }

    pub(crate) fn flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) -> bool {
        let changed = self.phase != phase;
        self.phase = phase;
        changed
    }

    pub(crate) fn add_waiter(&mut self, waiter: oneshot::Sender<()>) {
        self.waiters.push(waiter);
    }

    /// Pick the next unit of work. Every step except `Settle` reschedules
    /// the flush, so a failed step never strands queued work.
    pub(crate) fn next_step(&mut self, graph: &mut Graph) -> Step {
        if self.is_idle() {
            self.flush_scheduled = false;
            return Step::Settle(std::mem::take(&mut self.waiters));
        }
        self.flush_scheduled = true;

        if let Some(id) = self.maybe.shift_remove_index(0) {
            return Step::ResolveMaybe(id);
        }
        if !self.dirty.is_empty() {
            self.organise(graph);
            return Step::Organise;
        }
        match self.organised.shift_remove_index(0) {
            Some(id) => Step::Apply(id),
            None => {
                self.flush_scheduled = false;
                Step::Settle(std::mem::take(&mut self.waiters))
            }
        }
    }

    fn organise(&mut self, graph: &mut Graph) {
        let mut pending = std::mem::take(&mut self.dirty);
        for id in std::mem::take(&mut self.organised) {
            pending.insert(id);
        }
        let queued = pending.len();
        self.organised = graph.prune_redundant(pending);
        trace!(queued, kept = self.organised.len(), "organised dirty reactions");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn ids(graph: &mut Graph, count: usize) -> Vec<NodeId> {
        (0..count).map(|_| graph.insert(Node::cell())).collect()
    }

    #[test]
    fn dirty_absorbs_maybe() {
        let mut graph = Graph::new();
        let id = ids(&mut graph, 1)[0];
        let mut scheduler = Scheduler::new();

        scheduler.enqueue(id, Flag::MaybeDirty);
        scheduler.enqueue(id, Flag::Dirty);
        scheduler.enqueue(id, Flag::MaybeDirty);

        assert!(scheduler.maybe.is_empty());
        assert_eq!(scheduler.dirty.len(), 1);
        assert!(scheduler.flush_scheduled());
    }

    #[test]
    fn steps_follow_phase_order() {
        let mut graph = Graph::new();
        let nodes = ids(&mut graph, 2);
        let mut scheduler = Scheduler::new();

        scheduler.enqueue(nodes[0], Flag::Dirty);
        scheduler.enqueue(nodes[1], Flag::MaybeDirty);

        assert!(matches!(scheduler.next_step(&mut graph), Step::ResolveMaybe(id) if id == nodes[1]));
        scheduler.confirm(nodes[1], true);

        assert!(matches!(scheduler.next_step(&mut graph), Step::Organise));
        assert!(matches!(scheduler.next_step(&mut graph), Step::Apply(id) if id == nodes[0]));
        assert!(matches!(scheduler.next_step(&mut graph), Step::Apply(id) if id == nodes[1]));
        assert!(matches!(scheduler.next_step(&mut graph), Step::Settle(_)));
        assert!(!scheduler.flush_scheduled());
    }

    #[test]
    fn false_alarm_is_dropped() {
        let mut graph = Graph::new();
        let id = ids(&mut graph, 1)[0];
        let mut scheduler = Scheduler::new();

        scheduler.enqueue(id, Flag::MaybeDirty);
        assert!(matches!(scheduler.next_step(&mut graph), Step::ResolveMaybe(_)));
        scheduler.confirm(id, false);

        assert!(scheduler.is_idle());
        assert!(matches!(scheduler.next_step(&mut graph), Step::Settle(_)));
    }

    #[test]
    fn settle_releases_waiters() {
        let mut graph = Graph::new();
        let mut scheduler = Scheduler::new();
        let (tx, mut rx) = oneshot::channel();
        scheduler.add_waiter(tx);

        match scheduler.next_step(&mut graph) {
            Step::Settle(waiters) => {
                for waiter in waiters {
                    waiter.send(()).unwrap();
                }
            }
            _ => panic!("expected settle"),
        }
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn forget_removes_from_every_queue() {
        let mut graph = Graph::new();
        let nodes = ids(&mut graph, 2);
        let mut scheduler = Scheduler::new();

        scheduler.enqueue(nodes[0], Flag::Dirty);
        scheduler.enqueue(nodes[1], Flag::MaybeDirty);
        scheduler.forget(nodes[0]);
        scheduler.forget(nodes[1]);

        assert!(scheduler.is_idle());
        assert!(!scheduler.is_queued(nodes[0]));
    }
}
