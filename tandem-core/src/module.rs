//! Modules
//!
//! A module is one unit of computation in the pipeline. It declares the
//! relations it provides and requires, then is driven once per round by its
//! dependency node.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Double;
//!
//! impl Module for Double {
//!     fn declare(&mut self, relations: &mut RelationStore) -> Result<()> {
//!         relations.require("x")?;
//!         relations.provide("doubled", 0)?;
//!         Ok(())
//!     }
//!
//!     fn execute<'a>(&'a mut self, ctx: &'a mut RoundContext<'_>) -> BoxFuture<'a, ModuleResult> {
//!         async move {
//!             let x: i64 = ctx.get_as("x")?;
//!             let doubled = ctx.offload(move || x * 2).await?;
//!             ctx.set("doubled", doubled)?;
//!             Ok(())
//!         }
//!         .boxed()
//!     }
//! }
//! ```

use std::any::Any;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::{BoxError, PipelineError, Result};
use crate::relation::{RelationKind, RelationStore};
use crate::runtime::HeavyExecutor;

/// Result of one round of module execution.
pub type ModuleResult = std::result::Result<(), ModuleError>;

/// Why a module's round did not complete.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// The module failed. The pipeline stops and reports this error.
    #[error("{0}")]
    Failed(BoxError),

    /// The module asks the caller to stop, rebuild and resume.
    #[error("restart requested: {reason}")]
    Restart {
        /// Human readable reason for the restart.
        reason: String,
    },
}

impl ModuleError {
    /// Wrap any error as a module failure.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    /// Request a stop-and-restart.
    pub fn restart(reason: impl Into<String>) -> Self {
        Self::Restart {
            reason: reason.into(),
        }
    }
}

impl From<PipelineError> for ModuleError {
    fn from(error: PipelineError) -> Self {
        Self::Failed(Box::new(error))
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(error: serde_json::Error) -> Self {
        Self::Failed(Box::new(error))
    }
}

impl From<String> for ModuleError {
    fn from(message: String) -> Self {
        Self::Failed(message.into())
    }
}

impl From<&str> for ModuleError {
    fn from(message: &str) -> Self {
        Self::Failed(message.into())
    }
}

/// A unit of computation driven by the pipeline.
pub trait Module: Send + 'static {
    /// Name used in diagnostics and error messages.
    ///
    /// Defaults to the implementing type's name without its path.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Declare the relations this module provides and requires.
    ///
    /// Called exactly once, before the graph is built.
    fn declare(&mut self, relations: &mut RelationStore) -> Result<()>;

    /// Run one round.
    ///
    /// Provides have already been reset to their defaults. Calling
    /// [`RoundContext::skip`] marks this round's output as unavailable so
    /// downstream consumers skip as well.
    fn execute<'a>(&'a mut self, ctx: &'a mut RoundContext<'_>) -> BoxFuture<'a, ModuleResult>;
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// What a module sees while executing a round.
pub struct RoundContext<'a> {
    relations: &'a RelationStore,
    executor: &'a Arc<dyn HeavyExecutor>,
    round: u64,
    skip: bool,
}

impl<'a> RoundContext<'a> {
    pub(crate) fn new(
        relations: &'a RelationStore,
        executor: &'a Arc<dyn HeavyExecutor>,
        round: u64,
    ) -> Self {
        Self {
            relations,
            executor,
            round,
            skip: false,
        }
    }

    /// Name of the executing module.
    pub fn module_name(&self) -> &str {
        self.relations.module_name()
    }

    /// Zero-based round counter of this node.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The module's relations.
    pub fn relations(&self) -> &RelationStore {
        self.relations
    }

    /// Read a relation.
    pub fn get(&self, name: impl AsRef<str>) -> Result<Value> {
        self.relations.get(name.as_ref())
    }

    /// Read a relation and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, name: impl AsRef<str>) -> Result<T> {
        let name = name.as_ref();
        let value = self.relations.get(name)?;
        serde_json::from_value(value).map_err(|source| PipelineError::ValueType {
            name: name.to_string(),
            source,
        })
    }

    /// Write a relation this module provides.
    pub fn set(&self, name: impl AsRef<str>, value: impl Serialize) -> Result<()> {
        let name = name.as_ref();
        match self.relations.kind(name) {
            Some(RelationKind::Provide) => {}
            Some(RelationKind::Require) => {
                return Err(PipelineError::ReadOnlyRelation {
                    module: self.module_name().to_string(),
                    name: name.to_string(),
                })
            }
            None => {
                return Err(PipelineError::UnknownRelation {
                    module: self.module_name().to_string(),
                    name: name.to_string(),
                })
            }
        }

        let value = serde_json::to_value(value).map_err(|source| PipelineError::ValueType {
            name: name.to_string(),
            source,
        })?;
        self.relations.set(name, value)
    }

    /// Abstain from producing values this round.
    pub fn skip(&mut self) {
        self.skip = true;
    }

    /// Whether [`skip`](Self::skip) was called.
    pub fn skip_requested(&self) -> bool {
        self.skip
    }

    /// Run `job` on the heavy-work executor and await its result.
    pub async fn offload<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let output = self
            .executor
            .execute(Box::new(move || Box::new(job()) as Box<dyn Any + Send>))
            .await?;

        output
            .downcast::<R>()
            .map(|boxed| *boxed)
            .map_err(|_| PipelineError::Worker {
                reason: "job returned an unexpected type".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BlockingPool;
    use futures_util::FutureExt;
    use serde_json::json;

    struct Counter;

    impl Module for Counter {
        fn declare(&mut self, relations: &mut RelationStore) -> Result<()> {
            relations.provide("count", 0)?;
            relations.require("step")?;
            Ok(())
        }

        fn execute<'a>(&'a mut self, ctx: &'a mut RoundContext<'_>) -> BoxFuture<'a, ModuleResult> {
            async move {
                let step: i64 = ctx.get_as("step")?;
                ctx.set("count", step * 10)?;
                Ok(())
            }
            .boxed()
        }
    }

    fn context_parts() -> (RelationStore, Arc<dyn HeavyExecutor>) {
        let mut store = RelationStore::new("Counter");
        Counter.declare(&mut store).unwrap();
        (store, Arc::new(BlockingPool::new(2)))
    }

    #[test]
    fn default_name_is_short_type_name() {
        assert_eq!(Counter.name(), "Counter");
        assert_eq!(short_type_name("a::b::Wrapper<c::Inner>"), "Wrapper");
    }

    #[tokio::test]
    async fn context_reads_and_writes_relations() {
        let (store, executor) = context_parts();
        store.set("step", json!(3)).unwrap();

        let mut ctx = RoundContext::new(&store, &executor, 0);
        Counter.execute(&mut ctx).await.unwrap();

        assert_eq!(store.get("count").unwrap(), json!(30));
    }

    #[tokio::test]
    async fn context_rejects_writes_to_requires() {
        let (store, executor) = context_parts();
        let ctx = RoundContext::new(&store, &executor, 0);

        let err = ctx.set("step", 1).unwrap_err();
        assert!(matches!(err, PipelineError::ReadOnlyRelation { .. }));

        let err = ctx.set("nope", 1).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownRelation { .. }));
    }

    #[tokio::test]
    async fn get_as_reports_type_mismatch() {
        let (store, executor) = context_parts();
        store.set("step", json!("three")).unwrap();
        let ctx = RoundContext::new(&store, &executor, 0);

        let err = ctx.get_as::<i64>("step").unwrap_err();
        assert!(matches!(err, PipelineError::ValueType { ref name, .. } if name == "step"));
    }

    #[tokio::test]
    async fn offload_returns_typed_result() {
        let (store, executor) = context_parts();
        let mut ctx = RoundContext::new(&store, &executor, 4);

        let value = ctx.offload(|| (1..=10u64).sum::<u64>()).await.unwrap();
        assert_eq!(value, 55);
        assert_eq!(ctx.round(), 4);

        assert!(!ctx.skip_requested());
        ctx.skip();
        assert!(ctx.skip_requested());
    }

    #[test]
    fn module_errors_convert() {
        let err: ModuleError = "boom".into();
        assert_eq!(err.to_string(), "boom");

        let err = ModuleError::restart("config changed");
        assert_eq!(err.to_string(), "restart requested: config changed");
    }
}
