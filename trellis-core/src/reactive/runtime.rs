//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, memos,
//! reactions and roots. It owns the dependency graph, the active context
//! (collector, owner, batch) and the flush scheduler.
//!
//! # How It Works
//!
//! 1. Reads inside a collecting context record a dependency edge.
//!
//! 2. A write that changes a cell opens a batch and pushes dirtiness out
//!    through the graph: memos are flagged, reactions are queued.
//!
//! 3. Immediate reactions rerun when the batch closes. Deferred reactions wait
//!    for the next flush, which resolves maybe-dirty entries, prunes redundant
//!    reruns and applies the rest in order.
//!
//! # Threading
//!
//! The engine is single-threaded. Each thread gets its own runtime in
//! thread-local storage, and no borrow of it is ever held while user code
//! runs or across an `.await`.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{Flag, Graph, Phase, Scheduler, Step};
use crate::inspect::{GraphEvent, GraphSnapshot, Observer};

use super::batch::{batch, BatchQueue};
use super::context::Context;
use super::dirtiness::process_deps_dirtiness;
use super::reaction;

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::new());
}

/// Everything the engine knows about the current thread's graph.
pub(crate) struct RuntimeState {
    pub(crate) graph: Graph,
    pub(crate) scheduler: Scheduler,
    pub(crate) batch: Option<BatchQueue>,
    pub(crate) context: Context,
    pub(crate) config: RuntimeConfig,
    pub(crate) stepping: bool,
    pub(crate) flushing: bool,
    observer: Option<Rc<dyn Observer>>,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            graph: Graph::new(),
            scheduler: Scheduler::new(),
            batch: None,
            context: Context::default(),
            config: RuntimeConfig::default(),
            stepping: false,
            flushing: false,
            observer: None,
        }
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.scheduler.set_phase(phase) {
            self.graph.emit(GraphEvent::PhaseChanged { phase });
        }
    }

    fn next_step(&mut self) -> Step {
        let step = self.scheduler.next_step(&mut self.graph);
        self.set_phase(step.phase());
        step
    }

    fn update_recording(&mut self) {
        let recording = self.observer.is_some() || self.config.trace_events;
        self.graph.set_recording(recording);
    }

    /// Take buffered events for dispatch once the runtime is released.
    fn drain_events(&mut self) -> Option<(Rc<dyn Observer>, Vec<GraphEvent>)> {
        if !self.graph.has_events() {
            return None;
        }
        let events = self.graph.take_events();
        if self.config.trace_events {
            for event in &events {
                trace!(target: "trellis::events", ?event);
            }
        }
        self.observer.clone().map(|observer| (observer, events))
    }
}

fn dispatch(pending: Option<(Rc<dyn Observer>, Vec<GraphEvent>)>) {
    if let Some((observer, events)) = pending {
        for event in &events {
            observer.on_event(event);
        }
    }
}

/// Run `f` with exclusive access to this thread's runtime.
///
/// `f` must not call back into user code: everything reachable from here is
/// graph bookkeeping only.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
    let (out, pending) = RUNTIME.with(|runtime| {
        let mut state = runtime.borrow_mut();
        let out = f(&mut state);
        let pending = state.drain_events();
        (out, pending)
    });
    dispatch(pending);
    out
}

/// Like [`with_runtime`], but gives up when the runtime is unavailable
/// (already borrowed, or torn down at thread exit). Used from `Drop`.
pub(crate) fn try_with_runtime<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> Option<R> {
    let (out, pending) = RUNTIME
        .try_with(|runtime| {
            let mut state = runtime.try_borrow_mut().ok()?;
            let out = f(&mut state);
            let pending = state.drain_events();
            Some((out, pending))
        })
        .ok()
        .flatten()?;
    dispatch(pending);
    Some(out)
}

/// Handle to the current thread's reactive runtime.
///
/// All methods are associated functions: there is exactly one runtime per
/// thread and it is created on first use.
pub struct Runtime;

impl Runtime {
    /// Apply a configuration to this thread's runtime.
    pub fn configure(config: RuntimeConfig) {
        debug!(?config, "configuring runtime");
        with_runtime(|rt| {
            rt.stepping = config.stepping;
            rt.config = config;
            rt.update_recording();
        });
    }

    pub fn config() -> RuntimeConfig {
        with_runtime(|rt| rt.config.clone())
    }

    /// Attach an observer. Replaces any previously attached observer.
    pub fn observe(observer: Rc<dyn Observer>) {
        let previous = with_runtime(|rt| {
            let previous = rt.observer.replace(observer);
            rt.update_recording();
            previous
        });
        drop(previous);
    }

    pub fn unobserve() {
        let previous = with_runtime(|rt| {
            let previous = rt.observer.take();
            rt.update_recording();
            previous
        });
        drop(previous);
    }

    pub fn snapshot() -> GraphSnapshot {
        with_runtime(|rt| rt.graph.snapshot())
    }

    /// Number of live nodes in the graph.
    pub fn node_count() -> usize {
        with_runtime(|rt| rt.graph.len())
    }

    pub fn phase() -> Phase {
        with_runtime(|rt| rt.scheduler.phase())
    }

    /// True when no reaction is queued anywhere.
    pub fn is_settled() -> bool {
        with_runtime(|rt| rt.scheduler.is_idle() && rt.batch.is_none())
    }

    /// True when reads would currently record a dependency.
    pub fn is_tracking() -> bool {
        with_runtime(|rt| rt.context.collector.is_some() && !rt.context.untracked)
    }

    /// Enable or disable stepping mode. While stepping, flushes only advance
    /// through [`Runtime::step`].
    pub fn set_stepping(enabled: bool) {
        debug!(enabled, "stepping mode");
        with_runtime(|rt| rt.stepping = enabled);
    }

    pub fn is_stepping() -> bool {
        with_runtime(|rt| rt.stepping)
    }

    /// True when a scheduler step is waiting to run.
    pub fn has_pending_step() -> bool {
        with_runtime(|rt| rt.scheduler.flush_scheduled())
    }

    /// Perform exactly one scheduler step (stepping mode only).
    pub fn step() -> Result<Phase> {
        let ready = with_runtime(|rt| {
            if !rt.stepping {
                return Err(ReactiveError::SteppingDisabled);
            }
            if !rt.scheduler.flush_scheduled() {
                return Err(ReactiveError::NoPendingStep);
            }
            Ok(())
        });
        ready?;
        run_step()
    }

    /// Drain the scheduler until it settles.
    ///
    /// Does nothing in stepping mode, or when a flush is already running
    /// further up the stack (that flush picks up the new work).
    pub fn flush() -> Result<()> {
        let (start, limit) = with_runtime(|rt| {
            let start = !rt.flushing && !rt.stepping && rt.scheduler.flush_scheduled();
            if start {
                rt.flushing = true;
            }
            (start, rt.config.max_flush_steps)
        });
        if !start {
            return Ok(());
        }
        let _flushing = FlushGuard;
        debug!("flush started");

        let mut steps = 0usize;
        while with_runtime(|rt| rt.scheduler.flush_scheduled() && !rt.stepping) {
            if let Some(limit) = limit {
                if steps >= limit {
                    warn!(limit, "flush step budget exhausted");
                    return Err(ReactiveError::FlushLimitExceeded(limit));
                }
            }
            steps += 1;
            run_step()?;
        }
        debug!(steps, "flush finished");
        Ok(())
    }
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        try_with_runtime(|rt| rt.flushing = false);
    }
}

fn run_step() -> Result<Phase> {
    let step = with_runtime(|rt| rt.next_step());
    let phase = step.phase();
    match step {
        Step::Settle(waiters) => {
            trace!(waiters = waiters.len(), "scheduler settled");
            for waiter in waiters {
                // A dropped receiver just means nobody is waiting any more.
                let _ = waiter.send(());
            }
        }
        Step::ResolveMaybe(id) => {
            let dirty = process_deps_dirtiness(id) == Flag::Dirty;
            trace!(?id, dirty, "resolved maybe-dirty reaction");
            with_runtime(|rt| {
                rt.scheduler.confirm(id, dirty);
                // Resolving may have re-queued the reaction through a memo recompute.
                let flag = if rt.scheduler.is_queued(id) { Flag::Dirty } else { Flag::Clean };
                rt.graph.set_flag(id, flag);
            });
        }
        Step::Organise => {}
        Step::Apply(id) => {
            with_runtime(|rt| rt.graph.set_flag(id, Flag::Clean));
            match batch(|| reaction::rerun(id)) {
                Ok(()) => {}
                Err(ReactiveError::AlreadyDestroyed(_)) => {
                    trace!(?id, "skipping destroyed reaction");
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(phase)
}

/// Wait until every queued reaction has run.
///
/// Drives the scheduler (unless stepping mode is on, in which case something
/// else must call [`Runtime::step`]) and resolves once the maybe, dirty and
/// organised queues are all empty.
///
/// # Example
///
/// ```rust,ignore
/// count.set(1);
/// count.set(2);
/// settled().await?;
/// // every deferred reaction has now observed `2`, exactly once
/// ```
pub async fn settled() -> Result<()> {
    let receiver = with_runtime(|rt| {
        if rt.scheduler.is_idle() {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        rt.scheduler.add_waiter(sender);
        Some(receiver)
    });
    let Some(receiver) = receiver else {
        return Ok(());
    };
    Runtime::flush()?;
    // The sender only disappears if the runtime itself is gone.
    let _ = receiver.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Cell, Reaction, Root, Timing};

    fn deferred_counter(cell: &Cell<i32>) -> (Root, Rc<RefCell<Vec<i32>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = {
            let cell = cell.clone();
            let log = log.clone();
            Root::new(move || {
                Reaction::new(Timing::Deferred, move || log.borrow_mut().push(cell.get())).unwrap();
            })
        };
        (root, log)
    }

    #[test]
    fn flush_runs_deferred_reactions() {
        let cell = Cell::new(1);
        let (_root, log) = deferred_counter(&cell);
        assert!(log.borrow().is_empty());
        assert!(!Runtime::is_settled());

        Runtime::flush().unwrap();
        assert_eq!(*log.borrow(), vec![1]);
        assert!(Runtime::is_settled());
        assert_eq!(Runtime::phase(), Phase::Done);
    }

    #[test]
    fn stepping_advances_one_unit_at_a_time() {
        let cell = Cell::new(1);
        let (_root, log) = deferred_counter(&cell);
        Runtime::set_stepping(true);

        Runtime::flush().unwrap();
        assert!(log.borrow().is_empty());

        assert_eq!(Runtime::step().unwrap(), Phase::OrganisingEffectTree);
        assert_eq!(Runtime::step().unwrap(), Phase::ApplyingEffects);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(Runtime::step().unwrap(), Phase::Done);
        assert!(matches!(Runtime::step(), Err(ReactiveError::NoPendingStep)));

        Runtime::set_stepping(false);
        assert!(matches!(Runtime::step(), Err(ReactiveError::SteppingDisabled)));
    }

    #[test]
    fn flush_limit_aborts_runaway_cycles() {
        Runtime::configure(RuntimeConfig {
            max_flush_steps: Some(50),
            ..RuntimeConfig::default()
        });
        let cell = Cell::new(0);
        let _root = {
            let cell = cell.clone();
            Root::new(move || {
                Reaction::new(Timing::Deferred, move || {
                    let next = cell.get() + 1;
                    cell.set(next);
                })
                .unwrap();
            })
        };

        let err = Runtime::flush().unwrap_err();
        assert!(matches!(err, ReactiveError::FlushLimitExceeded(50)));
        assert!(Runtime::has_pending_step());
    }

    #[test]
    fn observer_sees_graph_events() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        Runtime::observe(Rc::new(move |event: &GraphEvent| {
            sink.borrow_mut().push(event.clone());
        }));

        let cell = Cell::new(1).labeled("source");
        let (_root, _log) = deferred_counter(&cell);
        Runtime::flush().unwrap();
        cell.set(2);
        Runtime::unobserve();

        let events = events.borrow();
        let id = cell.id();
        assert!(events.contains(&GraphEvent::NodeLabelled { id, label: "source".into() }));
        assert!(events.contains(&GraphEvent::ValueWritten { id }));
        assert!(events
            .iter()
            .any(|event| matches!(event, GraphEvent::EdgeAdded { source, .. } if *source == id)));
        assert!(events.contains(&GraphEvent::PhaseChanged { phase: Phase::Done }));
    }

    #[test]
    fn observer_may_query_the_runtime() {
        let counts = Rc::new(RefCell::new(Vec::new()));
        let sink = counts.clone();
        Runtime::observe(Rc::new(move |_: &GraphEvent| {
            sink.borrow_mut().push(Runtime::node_count());
        }));

        let _cell = Cell::new(0);
        Runtime::unobserve();
        assert!(!counts.borrow().is_empty());
    }

    #[tokio::test]
    async fn settled_resolves_immediately_when_idle() {
        settled().await.unwrap();
        assert!(Runtime::is_settled());
    }
}
