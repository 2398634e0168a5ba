//! Relation Store
//!
//! Each module owns one `RelationStore`: the named slots it provides or
//! requires. Declarations happen once, before the graph is built. While
//! building, the graph builder rebinds every satisfied `require` slot to the
//! provider's cell, after which reads and writes on either side go through
//! the same storage.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::cell::ValueCell;
use crate::error::{PipelineError, Result};

/// Whether a module produces or consumes a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// The module writes the value. At most one module may provide a name.
    Provide,

    /// The module reads the value written by the provider.
    Require,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provide => f.write_str("provide"),
            Self::Require => f.write_str("require"),
        }
    }
}

/// One named slot on a module.
#[derive(Debug, Clone)]
pub struct Relation {
    kind: RelationKind,

    /// Restored into the cell at the start of every round (provides only).
    default: Option<Value>,

    cell: ValueCell,
}

impl Relation {
    /// The relation's kind.
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// The declared default of a `provide` relation.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// The cell currently backing this relation.
    pub fn cell(&self) -> &ValueCell {
        &self.cell
    }

    /// Current value of the backing cell.
    pub fn value(&self) -> Value {
        self.cell.get()
    }
}

/// Handle returned by a declaration.
///
/// A slot names a relation; it is accepted anywhere a relation name is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    name: Arc<str>,
    kind: RelationKind,
}

impl Slot {
    /// The relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The relation kind.
    pub fn kind(&self) -> RelationKind {
        self.kind
    }
}

impl AsRef<str> for Slot {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// The relations declared by one module.
#[derive(Debug, Clone)]
pub struct RelationStore {
    module: String,
    relations: IndexMap<String, Relation>,
}

impl RelationStore {
    /// Create an empty store for the named module.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            relations: IndexMap::new(),
        }
    }

    /// Name of the owning module.
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Declare a relation.
    ///
    /// Until the graph is built the relation is backed by a private cell
    /// holding `default` (or `null`).
    pub fn declare(
        &mut self,
        kind: RelationKind,
        name: impl Into<String>,
        default: Option<Value>,
    ) -> Result<Slot> {
        let name = name.into();
        if self.relations.contains_key(&name) {
            return Err(PipelineError::DuplicateRelation {
                module: self.module.clone(),
                name,
            });
        }

        let initial = default.unwrap_or(Value::Null);
        let default = match kind {
            RelationKind::Provide => Some(initial.clone()),
            RelationKind::Require => None,
        };

        let slot = Slot {
            name: Arc::from(name.as_str()),
            kind,
        };
        self.relations.insert(
            name,
            Relation {
                kind,
                default,
                cell: ValueCell::new(initial),
            },
        );
        Ok(slot)
    }

    /// Declare a `provide` relation with the given per-round default.
    pub fn provide(&mut self, name: impl Into<String>, default: impl Into<Value>) -> Result<Slot> {
        self.declare(RelationKind::Provide, name, Some(default.into()))
    }

    /// Declare a `require` relation.
    pub fn require(&mut self, name: impl Into<String>) -> Result<Slot> {
        self.declare(RelationKind::Require, name, None)
    }

    /// Look up a relation.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// Whether the module declared `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Kind of a declared relation.
    pub fn kind(&self, name: &str) -> Option<RelationKind> {
        self.relations.get(name).map(Relation::kind)
    }

    /// The cell backing `name`.
    pub fn cell(&self, name: &str) -> Result<&ValueCell> {
        self.relations
            .get(name)
            .map(Relation::cell)
            .ok_or_else(|| self.unknown(name))
    }

    /// Read a relation's current value.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.cell(name).map(ValueCell::get)
    }

    /// Write a relation's value.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        self.cell(name)?.set(value);
        Ok(())
    }

    /// Restore every `provide` cell to its declared default.
    pub fn reset_provides(&self) {
        for relation in self.relations.values() {
            if let Some(default) = &relation.default {
                relation.cell.set(default.clone());
            }
        }
    }

    /// Iterate over `(name, relation)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Relation)> {
        self.relations.iter().map(|(name, rel)| (name.as_str(), rel))
    }

    /// Names of all `provide` relations.
    pub fn provides(&self) -> impl Iterator<Item = &str> {
        self.names_of(RelationKind::Provide)
    }

    /// Names of all `require` relations.
    pub fn requires(&self) -> impl Iterator<Item = &str> {
        self.names_of(RelationKind::Require)
    }

    /// Number of declared relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether no relation was declared.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Point a relation at a shared cell. Only the graph builder does this,
    /// before any round runs.
    pub(crate) fn bind(&mut self, name: &str, cell: ValueCell) {
        if let Some(relation) = self.relations.get_mut(name) {
            relation.cell = cell;
        }
    }

    fn names_of(&self, kind: RelationKind) -> impl Iterator<Item = &str> {
        self.relations
            .iter()
            .filter(move |(_, rel)| rel.kind == kind)
            .map(|(name, _)| name.as_str())
    }

    fn unknown(&self, name: &str) -> PipelineError {
        PipelineError::UnknownRelation {
            module: self.module.clone(),
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_declaration_fails() {
        let mut store = RelationStore::new("A");
        store.provide("a", 0).unwrap();

        let err = store.require("a").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateRelation { ref module, ref name } if module == "A" && name == "a"
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unwired_relations_use_private_default() {
        let mut store = RelationStore::new("B");
        let a = store.require("a").unwrap();
        let b = store.provide("b", 5).unwrap();

        assert_eq!(a.kind(), RelationKind::Require);
        assert_eq!(store.get(a.name()).unwrap(), Value::Null);
        assert_eq!(store.get(b.as_ref()).unwrap(), json!(5));
    }

    #[test]
    fn reset_restores_provides_only() {
        let mut store = RelationStore::new("B");
        store.require("a").unwrap();
        store.provide("b", 1).unwrap();

        store.set("a", json!("upstream")).unwrap();
        store.set("b", json!(99)).unwrap();
        store.reset_provides();

        assert_eq!(store.get("b").unwrap(), json!(1));
        assert_eq!(store.get("a").unwrap(), json!("upstream"));
    }

    #[test]
    fn unknown_relation_is_reported() {
        let store = RelationStore::new("C");
        let err = store.get("missing").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownRelation { .. }));
    }

    #[test]
    fn bind_redirects_to_shared_cell() {
        let mut provider = RelationStore::new("A");
        provider.provide("a", 0).unwrap();
        let mut requirer = RelationStore::new("B");
        requirer.require("a").unwrap();

        requirer.bind("a", provider.cell("a").unwrap().clone());
        provider.set("a", json!(3)).unwrap();

        assert_eq!(requirer.get("a").unwrap(), json!(3));
        assert!(requirer
            .cell("a")
            .unwrap()
            .shares_with(provider.cell("a").unwrap()));
    }

    #[test]
    fn provides_and_requires_are_partitioned() {
        let mut store = RelationStore::new("D");
        store.require("b").unwrap();
        store.provide("d", json!([])).unwrap();
        store.require("c").unwrap();

        assert_eq!(store.provides().collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(store.requires().collect::<Vec<_>>(), vec!["b", "c"]);
    }
}
