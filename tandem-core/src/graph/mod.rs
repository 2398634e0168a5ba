//! Dependency Graph
//!
//! This module builds the graph that connects modules through their
//! relations.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph where:
//!
//! - Nodes wrap modules
//! - An `after` edge runs from a provider to each module requiring one of
//!   its relations; the requirer records the same relationship as a
//!   `before` edge
//!
//! # Design Decisions
//!
//! 1. Edges are inferred from relation names; modules never reference each
//!    other directly.
//!
//! 2. Cells are unified through an explicit registry keyed by relation name,
//!    filled once at build time. Nothing is rewired while rounds run.
//!
//! 3. Both edge directions are kept because the round protocol signals
//!    neighbors both ways.

mod builder;
mod node;
mod registry;

pub use builder::{DependencyGraph, GraphBuilder};
pub use node::{DependencyNode, Neighbors, NodeId};
pub(crate) use node::NodeParts;
pub use registry::{CellEntry, CellRegistry};
