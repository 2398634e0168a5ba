//! Tandem Core
//!
//! This crate provides the core of the Tandem dataflow engine.
//! It implements:
//!
//! - Named relations shared between modules (provide / require)
//! - Automatic dependency graph construction with cycle detection
//! - A round protocol that keeps every module within one round of its
//!   neighbors without a global barrier
//! - A heavy-work pool for blocking computations
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `relation`: Value cells and per-module relation stores
//! - `module`: The `Module` trait and what a module sees during a round
//! - `graph`: Dependency graph construction
//! - `runtime`: Node tasks, triggers and the pipeline driver
//! - `diagnostics`: Graph and module state dumps
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem_core::{Pipeline, RunOutcome};
//!
//! let pipeline = Pipeline::start(vec![Box::new(Camera), Box::new(Detector)])?;
//! let stop = pipeline.stop_handle();
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stop.stop().await;
//! });
//!
//! match pipeline.run().await? {
//!     RunOutcome::Stopped => {}
//!     RunOutcome::Restart { module, reason } => {
//!         tracing::info!(%module, %reason, "rebuilding pipeline");
//!     }
//! }
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod module;
pub mod relation;
pub mod runtime;

pub use config::{PipelineConfig, RequirementPolicy};
pub use diagnostics::{DiagnosticsSink, GraphSnapshot, ModuleSnapshot, TracingSink};
pub use error::{BoxError, PipelineError, Result};
pub use module::{Module, ModuleError, ModuleResult, RoundContext};
pub use relation::{RelationKind, RelationStore, ValueCell};
pub use runtime::{
    BlockingPool, HeavyExecutor, Pipeline, PipelineBuilder, PipelineState, RunOutcome, StopHandle,
};

pub use serde_json::Value;
