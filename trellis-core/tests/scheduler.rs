//! Scheduler Tests
//!
//! Ordering, redundancy pruning and stepping of the deferred flush, observed
//! through the public API and the observer interface.

use std::cell::RefCell;
use std::rc::Rc;

use trellis_core::{
    settled, Cell, GraphEvent, Memo, NodeKind, Phase, Reaction, Root, Runtime, RuntimeConfig, Timing,
};

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn phases(events: &[GraphEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEvent::PhaseChanged { phase } => Some(*phase),
            _ => None,
        })
        .collect()
}

/// Deferred reactions rerun in the order they were dirtied.
#[tokio::test]
async fn reruns_follow_enqueue_order() {
    let first = Cell::new(0);
    let second = Cell::new(0);
    let out = log();
    let _root = {
        let (first, second, out) = (first.clone(), second.clone(), out.clone());
        Root::new(move || {
            let a_out = out.clone();
            Reaction::new(Timing::Deferred, move || a_out.borrow_mut().push(format!("a{}", first.get()))).unwrap();
            Reaction::new(Timing::Deferred, move || out.borrow_mut().push(format!("b{}", second.get()))).unwrap();
        })
    };
    settled().await.unwrap();
    out.borrow_mut().clear();

    second.set(1);
    first.set(1);
    settled().await.unwrap();
    assert_eq!(*out.borrow(), vec!["b1", "a1"]);
}

/// A dirty child of a dirty parent is not rerun on its own: the parent's
/// rerun destroys and recreates it.
#[tokio::test]
async fn child_of_rerunning_parent_is_pruned() {
    let source = Cell::new(0);
    let out = log();
    let _root = {
        let (source, out) = (source.clone(), out.clone());
        Root::new(move || {
            Reaction::new(Timing::Deferred, move || {
                let generation = source.get();
                out.borrow_mut().push(format!("parent {generation}"));
                let (source, out) = (source.clone(), out.clone());
                Reaction::new(Timing::Deferred, move || {
                    out.borrow_mut().push(format!("child {generation} sees {}", source.get()));
                })
                .unwrap();
            })
            .unwrap();
        })
    };
    settled().await.unwrap();
    assert_eq!(*out.borrow(), vec!["parent 0", "child 0 sees 0"]);
    out.borrow_mut().clear();

    source.set(1);
    settled().await.unwrap();
    assert_eq!(*out.borrow(), vec!["parent 1", "child 1 sees 1"]);
}

/// A maybe-dirty reaction whose memo cuts off is resolved without a rerun,
/// and stepping exposes each phase of the flush.
#[test]
fn stepping_walks_every_phase() {
    let a = Cell::new(2);
    let is_even = {
        let a = a.clone();
        Memo::new(move || a.get() % 2 == 0)
    };
    let runs = Rc::new(std::cell::Cell::new(0));
    let _root = {
        let (is_even, runs) = (is_even.clone(), runs.clone());
        Root::new(move || {
            Reaction::new(Timing::Deferred, move || {
                is_even.get();
                runs.set(runs.get() + 1);
            })
            .unwrap();
        })
    };
    Runtime::flush().unwrap();
    assert_eq!(runs.get(), 1);

    Runtime::configure(RuntimeConfig {
        stepping: true,
        ..RuntimeConfig::default()
    });

    a.set(4);
    assert_eq!(Runtime::phase(), Phase::AwaitingFlush);
    assert_eq!(Runtime::step().unwrap(), Phase::ProcessingMaybes);
    assert_eq!(Runtime::step().unwrap(), Phase::Done);
    assert_eq!(runs.get(), 1);

    a.set(5);
    assert_eq!(Runtime::step().unwrap(), Phase::ProcessingMaybes);
    assert_eq!(Runtime::step().unwrap(), Phase::OrganisingEffectTree);
    assert_eq!(runs.get(), 1);
    assert_eq!(Runtime::step().unwrap(), Phase::ApplyingEffects);
    assert_eq!(runs.get(), 2);
    assert_eq!(Runtime::step().unwrap(), Phase::Done);
    assert!(!Runtime::has_pending_step());
}

/// Leaving stepping mode lets a regular flush drain the rest.
#[tokio::test]
async fn settled_after_leaving_stepping_mode() {
    let source = Cell::new(0);
    let out = log();
    let _root = {
        let (source, out) = (source.clone(), out.clone());
        Root::new(move || {
            Reaction::new(Timing::Deferred, move || out.borrow_mut().push(source.get().to_string())).unwrap();
        })
    };
    Runtime::set_stepping(true);
    assert_eq!(Runtime::step().unwrap(), Phase::OrganisingEffectTree);
    assert!(out.borrow().is_empty());

    Runtime::set_stepping(false);
    settled().await.unwrap();
    assert_eq!(*out.borrow(), vec!["0"]);
    assert_eq!(Runtime::phase(), Phase::Done);
}

/// The observer sees the flush phases in order and the lifecycle of nodes.
#[tokio::test]
async fn observer_sees_flush_phases_and_lifecycle() {
    let events = Rc::new(RefCell::new(Vec::new()));
    {
        let events = events.clone();
        Runtime::observe(Rc::new(move |event: &GraphEvent| events.borrow_mut().push(event.clone())));
    }

    let source = Cell::new(0).labeled("source");
    let root = {
        let source = source.clone();
        Root::new(move || {
            Reaction::new(Timing::Deferred, move || {
                source.get();
            })
            .unwrap()
            .labeled("printer");
        })
    };
    settled().await.unwrap();
    root.destroy().unwrap();
    Runtime::unobserve();

    let events = events.borrow();
    assert_eq!(
        phases(&events),
        vec![
            Phase::AwaitingFlush,
            Phase::OrganisingEffectTree,
            Phase::ApplyingEffects,
            Phase::Done
        ]
    );
    let created: Vec<NodeKind> = events
        .iter()
        .filter_map(|event| match event {
            GraphEvent::NodeCreated { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec![NodeKind::Cell, NodeKind::Root, NodeKind::Reaction]);
    assert!(events.contains(&GraphEvent::NodeDestroyed { id: root.id() }));
    assert!(events
        .iter()
        .any(|event| matches!(event, GraphEvent::EdgeRemoved { source: s, .. } if *s == source.id())));
}

/// Snapshots describe labels, ownership and edges, and serialize to JSON.
#[tokio::test]
async fn snapshot_describes_the_graph() {
    let source = Cell::new(1).labeled("count");
    let doubled = {
        let source = source.clone();
        Memo::new(move || source.get() * 2).labeled("doubled")
    };
    let root = {
        let doubled = doubled.clone();
        Root::new(move || {
            Reaction::new(Timing::Immediate, move || {
                doubled.get();
            })
            .unwrap();
        })
        .labeled("app")
    };
    let reaction = root.children()[0];

    let snapshot = Runtime::snapshot();
    assert_eq!(snapshot.nodes.len(), 4);
    assert_eq!(snapshot.node(reaction.id()).unwrap().parent, Some(root.id()));
    assert_eq!(snapshot.node(doubled.id()).unwrap().label.as_deref(), Some("doubled"));
    assert!(snapshot.edges.contains(&(source.id(), doubled.id())));
    assert!(snapshot.edges.contains(&(doubled.id(), reaction.id())));

    let json = snapshot.to_json().unwrap();
    assert!(json.contains("\"count\""));
    assert!(json.contains("\"app\""));
}
