//! Diagnostics
//!
//! Observational dumps of the graph structure and of module state. A
//! `DiagnosticsSink` receives them; it never feeds anything back into
//! scheduling.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::relation::{RelationKind, RelationStore};
use crate::runtime::NodeState;

/// One node of a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    /// Module name.
    pub name: String,
    /// Consumers of this node.
    pub after: Vec<String>,
    /// Providers of this node.
    pub before: Vec<String>,
    /// Number of consumer edges.
    pub after_edges: usize,
    /// Number of provider edges.
    pub before_edges: usize,
    /// Countdown at the time of the snapshot.
    pub edges_to_go: usize,
    /// Requirements nobody provides.
    pub missing: Vec<String>,
    /// State of the node task.
    pub state: NodeState,
    /// Rounds completed.
    pub rounds: u64,
}

impl NodeSnapshot {
    /// Whether the node never executes its module.
    pub fn is_deactivated(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Provider and requirers of one relation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationLink {
    /// Relation name.
    pub name: String,
    /// Providing module.
    pub provider: String,
    /// Requiring modules.
    pub requirers: Vec<String>,
}

/// Structure of the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSnapshot {
    /// Nodes in module order.
    pub nodes: Vec<NodeSnapshot>,
    /// Module names, providers before their consumers.
    pub order: Vec<String>,
    /// Wired relations.
    pub relations: Vec<RelationLink>,
}

impl GraphSnapshot {
    /// Look up a node by module name.
    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Render as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for GraphSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{} [{:?}, round {}]", node.name, node.state, node.rounds)?;
            writeln!(f, "  after: {}", node.after.join(", "))?;
            writeln!(f, "  before: {}", node.before.join(", "))?;
            writeln!(
                f,
                "  edges: {} to go, {} after, {} before",
                node.edges_to_go, node.after_edges, node.before_edges
            )?;
            if !node.missing.is_empty() {
                writeln!(f, "  missing: {}", node.missing.join(", "))?;
            }
        }
        Ok(())
    }
}

/// One relation of a [`ModuleSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationSnapshot {
    /// Relation name.
    pub name: String,
    /// Provide or require.
    pub kind: RelationKind,
    /// Value at the time of the snapshot.
    pub value: Value,
}

/// State of one module after a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSnapshot {
    /// Module name.
    pub module: String,
    /// Round the snapshot was taken after.
    pub round: u64,
    /// Whether the module was skipped this round.
    pub skipped: bool,
    /// Time spent in the module's execution logic.
    pub elapsed: Duration,
    /// Relation values in declaration order.
    pub relations: Vec<RelationSnapshot>,
}

impl ModuleSnapshot {
    /// Capture the current values of a module's relations.
    pub fn capture(relations: &RelationStore, round: u64, skipped: bool, elapsed: Duration) -> Self {
        Self {
            module: relations.module_name().to_string(),
            round,
            skipped,
            elapsed,
            relations: relations
                .iter()
                .map(|(name, relation)| RelationSnapshot {
                    name: name.to_string(),
                    kind: relation.kind(),
                    value: relation.value(),
                })
                .collect(),
        }
    }

    /// Value of a relation in this snapshot.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.relations
            .iter()
            .find(|relation| relation.name == name)
            .map(|relation| &relation.value)
    }
}

impl fmt::Display for ModuleSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (round {}, {:?})", self.module, self.round, self.elapsed)?;
        for relation in &self.relations {
            writeln!(f, "  {} {}: {}", relation.kind, relation.name, relation.value)?;
        }
        Ok(())
    }
}

/// Receives diagnostic dumps.
pub trait DiagnosticsSink: Send + Sync + 'static {
    /// Called once with the wired graph.
    fn graph(&self, _snapshot: &GraphSnapshot) {}

    /// Called after each executed or skipped round when round dumps are on.
    fn round(&self, _snapshot: &ModuleSnapshot) {}
}

/// Sink that writes dumps as `tracing` debug events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn graph(&self, snapshot: &GraphSnapshot) {
        tracing::debug!(
            target: "tandem::diagnostics",
            nodes = snapshot.nodes.len(),
            relations = snapshot.relations.len(),
            "dependency graph\n{snapshot}"
        );
    }

    fn round(&self, snapshot: &ModuleSnapshot) {
        tracing::debug!(
            target: "tandem::diagnostics",
            module = %snapshot.module,
            round = snapshot.round,
            skipped = snapshot.skipped,
            "module state\n{snapshot}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn module_snapshot_captures_relations_in_order() {
        let mut store = RelationStore::new("B");
        store.require("a").unwrap();
        store.provide("b", 1).unwrap();
        store.set("a", json!(4)).unwrap();

        let snapshot = ModuleSnapshot::capture(&store, 2, false, Duration::from_millis(3));

        assert_eq!(snapshot.module, "B");
        assert_eq!(snapshot.value("a"), Some(&json!(4)));
        assert_eq!(snapshot.value("b"), Some(&json!(1)));
        assert_eq!(snapshot.relations[0].kind, RelationKind::Require);

        let text = snapshot.to_string();
        assert!(text.contains("require a: 4"));
        assert!(text.contains("provide b: 1"));
    }

    #[test]
    fn graph_snapshot_renders_and_serializes() {
        let snapshot = GraphSnapshot {
            nodes: vec![NodeSnapshot {
                name: "A".into(),
                after: vec!["B".into()],
                before: vec![],
                after_edges: 1,
                before_edges: 0,
                edges_to_go: 0,
                missing: vec![],
                state: NodeState::Idle,
                rounds: 0,
            }],
            order: vec!["A".into()],
            relations: vec![],
        };

        assert!(snapshot.to_string().contains("after: B"));
        let json: Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["nodes"][0]["state"], json!("idle"));
        assert!(snapshot.node("A").is_some());
        assert!(!snapshot.node("A").unwrap().is_deactivated());
    }
}
