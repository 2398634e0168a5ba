//! Relations
//!
//! Modules exchange data through named relations. A relation either
//! *provides* a value or *requires* one; the graph builder matches the two
//! sides by name and makes them share a single `ValueCell`.

mod cell;
mod store;

pub use cell::ValueCell;
pub use store::{Relation, RelationKind, RelationStore, Slot};
