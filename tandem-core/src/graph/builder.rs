//! Graph Builder
//!
//! Turns a list of modules into a wired, validated dependency graph.
//!
//! # Algorithm
//!
//! 1. Wrap every module in a `DependencyNode` and let it declare its
//!    relations.
//! 2. Register every `provide` in the cell registry. A second provider for a
//!    name fails with `DoubleProvide`.
//! 3. For every `require` with a provider, add the `after` edge on the
//!    provider, the mirrored `before` edge on the requirer, and rebind the
//!    requirer's slot to the provider's cell.
//! 4. Check the `after` edges for cycles (three-colour depth-first search).
//! 5. Handle requirements nobody provides according to the
//!    `RequirementPolicy`: fail, or deactivate the requiring node.

use std::collections::VecDeque;

use tracing::instrument;

use super::node::{DependencyNode, NodeId, NodeParts};
use super::registry::CellRegistry;
use crate::config::RequirementPolicy;
use crate::diagnostics::{GraphSnapshot, NodeSnapshot, RelationLink};
use crate::error::{PipelineError, Result};
use crate::module::Module;
use crate::relation::{RelationStore, ValueCell};
use crate::runtime::NodeState;

/// Builds dependency graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBuilder {
    policy: RequirementPolicy,
}

impl GraphBuilder {
    /// Create a builder with the given requirement policy.
    pub fn new(policy: RequirementPolicy) -> Self {
        Self { policy }
    }

    /// The requirement policy in use.
    pub fn policy(&self) -> RequirementPolicy {
        self.policy
    }

    /// Build and validate the graph for `modules`.
    #[instrument(skip_all, fields(modules = modules.len(), policy = ?self.policy))]
    pub fn build(&self, modules: Vec<Box<dyn Module>>) -> Result<DependencyGraph> {
        let mut nodes = Vec::with_capacity(modules.len());
        for (index, mut module) in modules.into_iter().enumerate() {
            let mut relations = RelationStore::new(module.name());
            module.declare(&mut relations)?;
            nodes.push(DependencyNode::new(NodeId::from(index), module, relations));
        }

        let registry = wire(&mut nodes)?;
        detect_cycles(&nodes)?;
        self.check_requirements(&mut nodes, &registry)?;

        let graph = DependencyGraph { nodes, registry };
        tracing::info!(
            nodes = graph.len(),
            relations = graph.registry.len(),
            deactivated = graph.nodes.iter().filter(|n| n.is_deactivated()).count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    fn check_requirements(&self, nodes: &mut [DependencyNode], registry: &CellRegistry) -> Result<()> {
        for node in nodes.iter_mut() {
            let missing: Vec<String> = node
                .relations()
                .requires()
                .filter(|name| !registry.contains(name))
                .map(str::to_owned)
                .collect();

            for name in missing {
                match self.policy {
                    RequirementPolicy::Strict => {
                        return Err(PipelineError::UnsatisfiedRequirement {
                            module: node.name().to_string(),
                            name,
                        });
                    }
                    RequirementPolicy::Lenient => {
                        tracing::warn!(
                            module = %node.name(),
                            relation = %name,
                            "nothing provides requirement, deactivating node"
                        );
                        node.deactivate(name);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Match provides with requires, add edges and unify cells.
fn wire(nodes: &mut [DependencyNode]) -> Result<CellRegistry> {
    let mut registry = CellRegistry::new();

    for node in nodes.iter() {
        for name in node.relations().provides() {
            let cell = node.relations().cell(name)?.clone();
            if let Err(first) = registry.register_provider(name, node.id(), cell) {
                return Err(PipelineError::DoubleProvide {
                    name: name.to_string(),
                    first: nodes[first.index()].name().to_string(),
                    second: node.name().to_string(),
                });
            }
        }
    }

    for index in 0..nodes.len() {
        let requirer = NodeId::from(index);
        let requires: Vec<String> = nodes[index]
            .relations()
            .requires()
            .map(str::to_owned)
            .collect();

        for name in requires {
            let Some((provider, cell)) = registry.add_requirer(&name, requirer) else {
                continue;
            };
            nodes[provider.index()].add_after(requirer);
            let node = &mut nodes[index];
            node.add_before(provider);
            node.bind(&name, cell);
            tracing::debug!(
                relation = %name,
                provider = %provider,
                requirer = %requirer,
                "relation wired"
            );
        }
    }

    Ok(registry)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not discovered yet.
    White,
    /// On the current DFS path.
    Gray,
    /// Finished.
    Black,
}

/// Fail with `CycleDetected` if the `after` edges contain a cycle.
fn detect_cycles(nodes: &[DependencyNode]) -> Result<()> {
    let mut colors = vec![Color::White; nodes.len()];
    for node in nodes {
        if colors[node.id().index()] == Color::White {
            visit(nodes, node.id(), &mut colors)?;
        }
    }
    Ok(())
}

fn visit(nodes: &[DependencyNode], current: NodeId, colors: &mut [Color]) -> Result<()> {
    colors[current.index()] = Color::Gray;

    for &next in nodes[current.index()].after() {
        match colors[next.index()] {
            Color::Gray => {
                return Err(PipelineError::CycleDetected {
                    from: nodes[current.index()].name().to_string(),
                    to: nodes[next.index()].name().to_string(),
                });
            }
            Color::White => visit(nodes, next, colors)?,
            Color::Black => {}
        }
    }

    colors[current.index()] = Color::Black;
    Ok(())
}

/// A wired, validated dependency graph.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    registry: CellRegistry,
}

impl DependencyGraph {
    /// All nodes, in module order.
    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    /// Look up a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id.index())
    }

    /// Look up a node by module name.
    pub fn find(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.iter().find(|node| node.name() == name)
    }

    /// The shared cell registry.
    pub fn registry(&self) -> &CellRegistry {
        &self.registry
    }

    /// The shared cell for a provided relation name.
    pub fn cell(&self, name: &str) -> Option<&ValueCell> {
        self.registry.cell(name)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node IDs ordered so providers come before their consumers.
    ///
    /// Kahn's algorithm over the `after` edges.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(DependencyNode::before_edges).collect();
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.before_edges() == 0)
            .map(DependencyNode::id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &next in self.nodes[id.index()].after() {
                let degree = &mut in_degree[next.index()];
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }

        order
    }

    /// Structural snapshot of the graph before any round ran.
    pub fn snapshot(&self) -> GraphSnapshot {
        let name_of = |id: &NodeId| self.nodes[id.index()].name().to_string();

        let nodes = self
            .nodes
            .iter()
            .map(|node| NodeSnapshot {
                name: node.name().to_string(),
                after: node.after().iter().map(name_of).collect(),
                before: node.before().iter().map(name_of).collect(),
                after_edges: node.after_edges(),
                before_edges: node.before_edges(),
                edges_to_go: node.before_edges(),
                missing: node.missing().to_vec(),
                state: if node.is_deactivated() {
                    NodeState::Deactivated
                } else {
                    NodeState::Idle
                },
                rounds: 0,
            })
            .collect();

        let relations = self
            .registry
            .iter()
            .map(|(name, entry)| RelationLink {
                name: name.to_string(),
                provider: name_of(&entry.provider()),
                requirers: entry.requirers().iter().map(name_of).collect(),
            })
            .collect();

        GraphSnapshot {
            nodes,
            order: self.topological_order().iter().map(name_of).collect(),
            relations,
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<NodeParts>, CellRegistry) {
        let nodes = self.nodes.into_iter().map(DependencyNode::into_parts).collect();
        (nodes, self.registry)
    }
}
