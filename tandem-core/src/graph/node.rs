//! Graph Nodes
//!
//! This module defines the dependency node that wraps each module in the
//! graph.

use std::fmt;

use smallvec::SmallVec;

use crate::module::Module;
use crate::relation::{RelationStore, ValueCell};

/// Identifier of a node in the dependency graph.
///
/// Node IDs are positions in the module list handed to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Get the raw index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Adjacency list of a node. Most nodes have only a few neighbors.
pub type Neighbors = SmallVec<[NodeId; 4]>;

/// A module together with its place in the dependency graph.
pub struct DependencyNode {
    /// Unique identifier for this node.
    id: NodeId,

    /// The wrapped module.
    module: Box<dyn Module>,

    /// Relations the module declared, rebound to shared cells by the builder.
    relations: RelationStore,

    /// Nodes that require something this node provides.
    after: Neighbors,

    /// Nodes that provide something this node requires.
    before: Neighbors,

    /// Requirements with no provider; non-empty means deactivated.
    missing: Vec<String>,
}

impl DependencyNode {
    /// Wrap a module whose relations were already declared.
    pub fn new(id: NodeId, module: Box<dyn Module>, relations: RelationStore) -> Self {
        Self {
            id,
            module,
            relations,
            after: Neighbors::new(),
            before: Neighbors::new(),
            missing: Vec::new(),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name of the wrapped module.
    pub fn name(&self) -> &str {
        self.relations.module_name()
    }

    /// The module's relations.
    pub fn relations(&self) -> &RelationStore {
        &self.relations
    }

    /// Add a consumer. Repeated edges to the same node are recorded once.
    pub fn add_after(&mut self, node_id: NodeId) {
        if !self.after.contains(&node_id) {
            self.after.push(node_id);
        }
    }

    /// Add a provider. Repeated edges to the same node are recorded once.
    pub fn add_before(&mut self, node_id: NodeId) {
        if !self.before.contains(&node_id) {
            self.before.push(node_id);
        }
    }

    /// Consumers of this node.
    pub fn after(&self) -> &[NodeId] {
        &self.after
    }

    /// Providers of this node.
    pub fn before(&self) -> &[NodeId] {
        &self.before
    }

    /// Number of consumer edges.
    pub fn after_edges(&self) -> usize {
        self.after.len()
    }

    /// Number of provider edges.
    pub fn before_edges(&self) -> usize {
        self.before.len()
    }

    /// Whether the node has no neighbors in either direction.
    pub fn is_isolated(&self) -> bool {
        self.after.is_empty() && self.before.is_empty()
    }

    /// Mark a requirement as unsatisfiable.
    pub fn deactivate(&mut self, requirement: impl Into<String>) {
        self.missing.push(requirement.into());
    }

    /// Whether some requirement has no provider.
    pub fn is_deactivated(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Requirements that have no provider.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub(crate) fn bind(&mut self, name: &str, cell: ValueCell) {
        self.relations.bind(name, cell);
    }

    pub(crate) fn into_parts(self) -> NodeParts {
        NodeParts {
            id: self.id,
            module: self.module,
            relations: self.relations,
            after: self.after,
            before: self.before,
            deactivated: !self.missing.is_empty(),
        }
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyNode")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("after", &self.after)
            .field("before", &self.before)
            .field("missing", &self.missing)
            .finish()
    }
}

/// A node taken apart for the runtime.
pub(crate) struct NodeParts {
    pub id: NodeId,
    pub module: Box<dyn Module>,
    pub relations: RelationStore,
    pub after: Neighbors,
    pub before: Neighbors,
    pub deactivated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::module::{ModuleResult, RoundContext};
    use futures_util::future::{BoxFuture, FutureExt};

    struct Idle;

    impl Module for Idle {
        fn declare(&mut self, _relations: &mut RelationStore) -> Result<()> {
            Ok(())
        }

        fn execute<'a>(&'a mut self, _ctx: &'a mut RoundContext<'_>) -> BoxFuture<'a, ModuleResult> {
            async { Ok(()) }.boxed()
        }
    }

    fn node(index: usize) -> DependencyNode {
        DependencyNode::new(
            NodeId::from(index),
            Box::new(Idle),
            RelationStore::new(format!("N{index}")),
        )
    }

    #[test]
    fn new_node_is_isolated() {
        let node = node(0);
        assert!(node.is_isolated());
        assert!(!node.is_deactivated());
        assert_eq!(node.name(), "N0");
        assert_eq!(node.id().index(), 0);
    }

    #[test]
    fn edges_are_deduplicated() {
        let mut node = node(0);
        let dep1 = NodeId::from(1);
        let dep2 = NodeId::from(2);

        node.add_after(dep1);
        node.add_after(dep1);
        node.add_before(dep2);
        node.add_before(dep2);

        assert_eq!(node.after(), &[dep1]);
        assert_eq!(node.before(), &[dep2]);
        assert_eq!(node.after_edges(), 1);
        assert_eq!(node.before_edges(), 1);
        assert!(!node.is_isolated());
    }

    #[test]
    fn deactivation_records_missing_requirement() {
        let mut node = node(3);
        node.deactivate("x");

        assert!(node.is_deactivated());
        assert_eq!(node.missing(), &["x".to_string()]);
        assert!(node.into_parts().deactivated);
    }
}
