//! Shared Value Cells
//!
//! A `ValueCell` is the storage behind a relation name. Cloning a cell does
//! not copy the value: every clone points at the same slot, so a provider's
//! write is immediately visible to all requirers holding a clone.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock`. Within a running pipeline
//! the lock is never contended across a round boundary: the provider writes
//! before it signals its consumers, and consumers read before they signal
//! the provider back.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_cell_id() -> u64 {
    CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A shared, mutable value slot.
///
/// # Example
///
/// ```rust,ignore
/// let provided = ValueCell::new(json!(0));
/// let required = provided.clone();
///
/// provided.set(json!(7));
/// assert_eq!(required.get(), json!(7));
/// ```
pub struct ValueCell {
    /// Unique identifier, shared by all clones.
    id: u64,

    /// The current value.
    value: Arc<RwLock<Value>>,
}

impl ValueCell {
    /// Create a new cell holding `value`.
    pub fn new(value: Value) -> Self {
        Self {
            id: next_cell_id(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// The cell's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get a copy of the current value.
    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    /// Inspect the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.value.read())
    }

    /// Overwrite the value.
    pub fn set(&self, value: Value) {
        *self.value.write() = value;
    }

    /// Overwrite the value and return the previous one.
    pub fn replace(&self, value: Value) -> Value {
        std::mem::replace(&mut *self.value.write(), value)
    }

    /// Update the value in place.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Value),
    {
        f(&mut self.value.write());
    }

    /// Whether `other` refers to the same storage as this cell.
    pub fn shares_with(&self, other: &ValueCell) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl Default for ValueCell {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl Clone for ValueCell {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }
}

impl Debug for ValueCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCell")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .finish()
    }
}
