//! Inspection
//!
//! An optional observer can watch the engine without influencing it. Every
//! graph mutation produces a [`GraphEvent`]; events are buffered while the
//! runtime is busy and handed to the observer once the runtime is released,
//! so an observer may query the runtime (for example take a snapshot) from
//! inside its callback.
//!
//! Events are only recorded while an observer is attached (or event tracing
//! is configured), so an unobserved runtime pays nothing for this module.

use serde::{Deserialize, Serialize};

use crate::graph::{Flag, NodeId, NodeKind, Phase};

/// A single observable change to the reactive graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEvent {
    NodeCreated { id: NodeId, kind: NodeKind },
    NodeLabelled { id: NodeId, label: String },
    NodeDestroyed { id: NodeId },
    /// `target` now subscribes to `source`.
    EdgeAdded { source: NodeId, target: NodeId },
    EdgeRemoved { source: NodeId, target: NodeId },
    FlagChanged { id: NodeId, flag: Flag },
    ValueWritten { id: NodeId },
    PhaseChanged { phase: Phase },
}

/// Receives graph events. Attach with `Runtime::observe`.
pub trait Observer {
    fn on_event(&self, event: &GraphEvent);
}

impl<F> Observer for F
where
    F: Fn(&GraphEvent),
{
    fn on_event(&self, event: &GraphEvent) {
        self(event)
    }
}

/// Point-in-time description of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: Option<String>,
    pub flag: Flag,
    pub parent: Option<NodeId>,
}

/// Point-in-time description of the whole graph, for visualisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,

    /// `(source, target)` pairs: `target` subscribes to `source`.
    pub edges: Vec<(NodeId, NodeId)>,
}

impl GraphSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
