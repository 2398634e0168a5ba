//! Runtime
//!
//! Drives a wired dependency graph: one tokio task per node, synchronized
//! by per-node edge countdowns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  decrement   ┌──────────┐  decrement   ┌──────────┐
//! │ Provider │ ───────────▶ │ Consumer │ ───────────▶ │ Provider │
//! │   task   │ ◀─────────── │   task   │              │  (next   │
//! └──────────┘  decrement   └──────────┘              │  round)  │
//!                                                     └──────────┘
//! ```
//!
//! Neighbors decrement each other in both directions when they finish a
//! round, which keeps every node within one round of its neighbors.
//! Expensive work is handed to a [`HeavyExecutor`] so node tasks never block
//! the async runtime.

mod event;
mod executor;
mod pipeline;
mod round;
mod trigger;

pub use event::{CancelToken, Event};
pub use executor::{BlockingPool, HeavyExecutor, Job, JobOutput};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineState, RunOutcome, StopHandle};
pub use trigger::{NodeState, NodeTrigger};
