//! Shared Cell Registry
//!
//! One entry per provided relation name: the provider's cell, which becomes
//! the canonical storage for that name, plus the nodes that require it. The
//! registry is filled while building the graph and never changes afterwards.

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::NodeId;
use crate::relation::ValueCell;

/// Registry entry for one relation name.
#[derive(Debug, Clone)]
pub struct CellEntry {
    cell: ValueCell,
    provider: NodeId,
    requirers: SmallVec<[NodeId; 4]>,
}

impl CellEntry {
    /// The shared cell.
    pub fn cell(&self) -> &ValueCell {
        &self.cell
    }

    /// The node that provides this name.
    pub fn provider(&self) -> NodeId {
        self.provider
    }

    /// Nodes that require this name.
    pub fn requirers(&self) -> &[NodeId] {
        &self.requirers
    }
}

/// Shared cells keyed by relation name.
#[derive(Debug, Clone, Default)]
pub struct CellRegistry {
    entries: IndexMap<String, CellEntry>,
}

impl CellRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` as the owner of `name`.
    ///
    /// Fails with the existing provider when the name is already taken.
    pub fn register_provider(
        &mut self,
        name: &str,
        provider: NodeId,
        cell: ValueCell,
    ) -> Result<(), NodeId> {
        if let Some(existing) = self.entries.get(name) {
            return Err(existing.provider);
        }
        self.entries.insert(
            name.to_string(),
            CellEntry {
                cell,
                provider,
                requirers: SmallVec::new(),
            },
        );
        Ok(())
    }

    /// Record `requirer` as a consumer of `name`.
    ///
    /// Returns the provider and a handle to the shared cell, or `None` when
    /// nobody provides the name.
    pub fn add_requirer(&mut self, name: &str, requirer: NodeId) -> Option<(NodeId, ValueCell)> {
        let entry = self.entries.get_mut(name)?;
        if !entry.requirers.contains(&requirer) {
            entry.requirers.push(requirer);
        }
        Some((entry.provider, entry.cell.clone()))
    }

    /// Look up an entry.
    pub fn entry(&self, name: &str) -> Option<&CellEntry> {
        self.entries.get(name)
    }

    /// The shared cell for `name`.
    pub fn cell(&self, name: &str) -> Option<&ValueCell> {
        self.entries.get(name).map(CellEntry::cell)
    }

    /// The provider of `name`.
    pub fn provider(&self, name: &str) -> Option<NodeId> {
        self.entries.get(name).map(CellEntry::provider)
    }

    /// Whether anybody provides `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterate over `(name, entry)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Number of provided names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is provided.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_provider_is_rejected() {
        let mut registry = CellRegistry::new();
        let a = NodeId::from(0);
        let b = NodeId::from(1);

        registry.register_provider("x", a, ValueCell::default()).unwrap();
        assert_eq!(registry.register_provider("x", b, ValueCell::default()), Err(a));
        assert_eq!(registry.provider("x"), Some(a));
    }

    #[test]
    fn requirers_receive_the_provider_cell() {
        let mut registry = CellRegistry::new();
        let provider = NodeId::from(0);
        let cell = ValueCell::new(json!(1));
        registry.register_provider("x", provider, cell.clone()).unwrap();

        let (owner, shared) = registry.add_requirer("x", NodeId::from(1)).unwrap();
        registry.add_requirer("x", NodeId::from(2)).unwrap();
        registry.add_requirer("x", NodeId::from(2)).unwrap();

        assert_eq!(owner, provider);
        assert!(shared.shares_with(&cell));
        assert_eq!(
            registry.entry("x").unwrap().requirers(),
            &[NodeId::from(1), NodeId::from(2)]
        );
    }

    #[test]
    fn unknown_name_has_no_cell() {
        let mut registry = CellRegistry::new();
        assert!(registry.add_requirer("nothing", NodeId::from(0)).is_none());
        assert!(!registry.contains("nothing"));
        assert!(registry.is_empty());
    }
}
