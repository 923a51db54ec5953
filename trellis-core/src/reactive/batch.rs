//! Batching
//!
//! A batch coalesces a burst of synchronous writes into one scheduling pass.
//! Only one batch is ever active per thread: a `batch` call made while
//! another batch is active simply joins it.
//!
//! Immediate reactions reached by propagation are queued in the active batch
//! instead of running mid-write. When the outermost batch closure returns,
//! the queue is drained in passes:
//!
//! 1. Take the queue, leaving a fresh one in place so writes made by the
//!    reruns below join the next pass.
//! 2. Resolve maybe-dirty entries by pulling on their dependencies.
//! 3. Drop entries whose ancestor reaction also reruns in this pass.
//! 4. Rerun the survivors in queue order.
//!
//! Passes repeat until one leaves the queue empty, or until
//! `max_flush_steps` passes have run. Reactions still queued at that point
//! are dropped from the batch and left clean, so a later write reaches them
//! again.

use indexmap::map::Entry;
use indexmap::{IndexMap, IndexSet};
use tracing::{error, trace, warn};

use crate::error::ReactiveError;
use crate::graph::{Flag, NodeId, Phase, Timing};

use super::dirtiness::process_deps_dirtiness;
use super::reaction;
use super::runtime::{try_with_runtime, with_runtime, RuntimeState};

/// Immediate reactions waiting for the active batch to close.
#[derive(Debug, Default)]
pub(crate) struct BatchQueue {
    entries: IndexMap<NodeId, Flag>,
}

impl BatchQueue {
    /// Queue `id`; a `Dirty` entry is never downgraded to `MaybeDirty`.
    pub(crate) fn enqueue(&mut self, id: NodeId, flag: Flag) {
        match self.entries.entry(id) {
            Entry::Occupied(mut entry) => {
                if flag == Flag::Dirty {
                    *entry.get_mut() = Flag::Dirty;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(flag);
            }
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) {
        self.entries.shift_remove(&id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl RuntimeState {
    /// Route a dirtied reaction to the batch (immediate) or the scheduler
    /// (deferred).
    pub(crate) fn enqueue_reaction(&mut self, id: NodeId, flag: Flag) {
        let (timing, current) = match self.graph.get(id) {
            Some(node) if !node.destroyed => match node.timing() {
                Some(timing) => (timing, node.flag),
                None => return,
            },
            _ => return,
        };

        match (timing, self.batch.as_mut()) {
            (Timing::Immediate, Some(queue)) => queue.enqueue(id, flag),
            (Timing::Immediate, None) => {
                warn!(?id, "immediate reaction dirtied outside a batch, deferring");
                self.schedule(id, flag);
            }
            (Timing::Deferred, _) => self.schedule(id, flag),
        }

        if current != Flag::Dirty {
            self.graph.set_flag(id, flag);
        }
    }

    fn schedule(&mut self, id: NodeId, flag: Flag) {
        self.scheduler.enqueue(id, flag);
        if self.scheduler.phase() == Phase::Done {
            self.set_phase(Phase::AwaitingFlush);
        }
    }
}

/// Clears the active batch when the outermost `batch` call unwinds.
struct BatchScope;

impl Drop for BatchScope {
    fn drop(&mut self) {
        try_with_runtime(|rt| rt.batch = None);
    }
}

/// Run `f` with writes coalesced into a single batch.
///
/// Immediate reactions dirtied inside `f` rerun once, after `f` returns,
/// and see every write it made.
///
/// # Example
///
/// ```rust,ignore
/// batch(|| {
///     first.set("Ada");
///     last.set("Lovelace");
/// });
/// // an immediate reaction on both names ran once, not twice
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let outermost = with_runtime(|rt| {
        if rt.batch.is_some() {
            return false;
        }
        rt.batch = Some(BatchQueue::default());
        true
    });
    if !outermost {
        return f();
    }

    let _scope = BatchScope;
    let out = f();
    drain();
    out
}

fn drain() {
    let limit = with_runtime(|rt| rt.config.max_flush_steps);
    let mut passes = 0usize;
    loop {
        let pass = with_runtime(|rt| rt.batch.as_mut().map(std::mem::take).unwrap_or_default());
        if pass.is_empty() {
            break;
        }
        if limit.is_some_and(|limit| passes >= limit) {
            error!(passes, dropped = pass.len(), "batch pass budget exhausted, dropping queued reactions");
            abandon(pass);
            break;
        }
        passes += 1;
        trace!(pass = passes, queued = pass.len(), "batch pass");
        run_pass(pass);
    }
}

fn abandon(pass: BatchQueue) {
    with_runtime(|rt| {
        for &id in pass.entries.keys() {
            rt.graph.set_flag(id, Flag::Clean);
        }
    });
}

fn run_pass(pass: BatchQueue) {
    let order: Vec<NodeId> = pass.entries.keys().copied().collect();
    let mut confirmed: IndexSet<NodeId> = IndexSet::with_capacity(order.len());

    for (id, flag) in pass.entries {
        let dirty = match flag {
            Flag::Dirty => true,
            Flag::MaybeDirty => process_deps_dirtiness(id) == Flag::Dirty,
            Flag::Clean => false,
        };
        if dirty {
            confirmed.insert(id);
        }
    }

    let survivors = with_runtime(|rt| {
        // Resolving a maybe entry can recompute a memo that re-queues other
        // members of this pass as dirty; they rerun now, not next pass.
        if let Some(active) = rt.batch.as_mut() {
            for &id in &order {
                if active.entries.get(&id) == Some(&Flag::Dirty) {
                    active.remove(id);
                    confirmed.insert(id);
                }
            }
        }
        for &id in &order {
            if !confirmed.contains(&id) {
                rt.graph.set_flag(id, Flag::Clean);
            }
        }
        let ordered: IndexSet<NodeId> = order.iter().copied().filter(|id| confirmed.contains(id)).collect();
        rt.graph.prune_redundant(ordered)
    });

    for id in survivors {
        match reaction::rerun(id) {
            Ok(()) | Err(ReactiveError::AlreadyDestroyed(_)) => {}
            Err(err) => error!(?id, %err, "reaction rerun failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::reactive::{Cell, Memo, Reaction, Root, Runtime};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn queue_never_downgrades_dirty() {
        let mut queue = BatchQueue::default();
        let id = with_runtime(|rt| rt.graph.insert(crate::graph::Node::cell()));

        queue.enqueue(id, Flag::Dirty);
        queue.enqueue(id, Flag::MaybeDirty);
        assert_eq!(queue.entries.get(&id), Some(&Flag::Dirty));

        queue.remove(id);
        assert!(queue.is_empty());
    }

    #[test]
    fn batched_writes_rerun_immediate_reaction_once() {
        let a = Cell::new(1);
        let b = Cell::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));
        let _root = {
            let (a, b, log) = (a.clone(), b.clone(), log.clone());
            Root::new(move || {
                Reaction::new(Timing::Immediate, move || log.borrow_mut().push(a.get() + b.get())).unwrap();
            })
        };

        batch(|| {
            a.set(2);
            b.set(2);
            assert_eq!(*log.borrow(), vec![2]);
        });
        assert_eq!(*log.borrow(), vec![2, 4]);
    }

    #[test]
    fn nested_batch_joins_outer() {
        let a = Cell::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let _root = {
            let (a, log) = (a.clone(), log.clone());
            Root::new(move || {
                Reaction::new(Timing::Immediate, move || log.borrow_mut().push(a.get())).unwrap();
            })
        };

        batch(|| {
            a.set(1);
            batch(|| a.set(2));
            assert_eq!(*log.borrow(), vec![0]);
        });
        assert_eq!(*log.borrow(), vec![0, 2]);
    }

    #[test]
    fn maybe_dirty_reaction_skipped_when_memo_cuts_off() {
        let a = Cell::new(2);
        let runs = Rc::new(std::cell::Cell::new(0));
        let is_even = {
            let a = a.clone();
            Memo::new(move || a.get() % 2 == 0)
        };
        let _root = {
            let (is_even, runs) = (is_even.clone(), runs.clone());
            Root::new(move || {
                Reaction::new(Timing::Immediate, move || {
                    is_even.get();
                    runs.set(runs.get() + 1);
                })
                .unwrap();
            })
        };

        a.set(4);
        assert_eq!(runs.get(), 1);
        a.set(5);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn writes_from_reruns_join_the_next_pass() {
        let source = Cell::new(0);
        let mirror = Cell::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _root = {
            let (source, mirror, seen) = (source.clone(), mirror.clone(), seen.clone());
            Root::new(move || {
                let writer = mirror.clone();
                Reaction::new(Timing::Immediate, move || writer.set(source.get() * 10)).unwrap();
                Reaction::new(Timing::Immediate, move || seen.borrow_mut().push(mirror.get())).unwrap();
            })
        };

        source.set(1);
        assert_eq!(*seen.borrow(), vec![0, 10]);
        assert!(with_runtime(|rt| rt.batch.is_none()));
    }

    #[test]
    fn pass_budget_stops_self_writing_immediate_reaction() {
        Runtime::configure(RuntimeConfig {
            max_flush_steps: Some(50),
            ..RuntimeConfig::default()
        });
        let cell = Cell::new(0);
        let root = {
            let cell = cell.clone();
            Root::new(move || {
                Reaction::new(Timing::Immediate, move || {
                    let next = cell.get() + 1;
                    cell.set(next);
                })
                .unwrap();
            })
        };
        // First run inside the constructor, then one rerun per pass.
        assert_eq!(cell.get_untracked(), 51);
        assert!(with_runtime(|rt| rt.batch.is_none()));

        let reaction = root.children()[0];
        assert!(!reaction.is_destroyed());
        assert_eq!(with_runtime(|rt| rt.graph.get(reaction.id()).map(|node| node.flag)), Some(Flag::Clean));

        cell.set(1_000);
        assert_eq!(cell.get_untracked(), 1_050);
    }
}
