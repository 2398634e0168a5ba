//! Pipeline
//!
//! Owns the wired node set and drives it: one task per node, first failure
//! wins, `stop()` drains everything before returning.
//!
//! # Lifecycle
//!
//! ```text
//! Built ──run()──▶ Running ──stop() / failure / restart──▶ Draining ──▶ Stopped
//! ```
//!
//! While draining, every node is signaled so no task stays parked on its
//! trigger. Tasks that are still busy when the drain timeout elapses are
//! aborted.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::instrument;

use super::event::CancelToken;
use super::executor::{BlockingPool, HeavyExecutor};
use super::round::{NodeExit, NodeTask, Shared};
use super::trigger::{NodeState, NodeTrigger};
use crate::config::PipelineConfig;
use crate::diagnostics::{DiagnosticsSink, GraphSnapshot};
use crate::error::{PipelineError, Result};
use crate::graph::{CellRegistry, GraphBuilder};
use crate::module::Module;
use crate::relation::ValueCell;

/// How a pipeline run ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// `stop()` was called.
    Stopped,

    /// A module asked for the pipeline to be rebuilt and resumed.
    Restart {
        /// Module that asked.
        module: String,
        /// Its stated reason.
        reason: String,
    },
}

impl RunOutcome {
    /// Whether the caller should rebuild and run again.
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::Restart { .. })
    }
}

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Wired but not running.
    Built,
    /// Node tasks are running rounds.
    Running,
    /// Cancelled; waiting for node tasks to exit.
    Draining,
    /// Every node task has exited.
    Stopped,
}

impl PipelineState {
    fn is_settled(self) -> bool {
        matches!(self, Self::Built | Self::Stopped)
    }
}

/// State shared between a pipeline and its stop handles.
struct Control {
    cancel: CancelToken,
    triggers: Vec<Arc<NodeTrigger>>,
    structure: GraphSnapshot,
    state: watch::Sender<PipelineState>,
    live: AtomicUsize,
}

impl Control {
    fn begin_shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("pipeline stopping");
        }
        self.cancel.cancel();
        self.state.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Draining;
                true
            } else {
                false
            }
        });
        for trigger in &self.triggers {
            trigger.fire();
        }
    }

    fn snapshot(&self) -> GraphSnapshot {
        let mut snapshot = self.structure.clone();
        for (node, trigger) in snapshot.nodes.iter_mut().zip(&self.triggers) {
            node.edges_to_go = trigger.edges_to_go();
            node.state = trigger.state();
            node.rounds = trigger.rounds();
        }
        snapshot
    }
}

/// Marks the pipeline stopped when `run` returns or is dropped.
struct StoppedGuard<'a>(&'a Control);

impl Drop for StoppedGuard<'_> {
    fn drop(&mut self) {
        self.0.state.send_replace(PipelineState::Stopped);
    }
}

/// Counts a node task as live until it is dropped.
struct LiveGuard(Arc<Control>);

impl LiveGuard {
    fn new(control: Arc<Control>) -> Self {
        control.live.fetch_add(1, Ordering::AcqRel);
        Self(control)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Configures and builds a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    executor: Option<Arc<dyn HeavyExecutor>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
}

impl PipelineBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom heavy-work executor instead of a [`BlockingPool`].
    pub fn executor(mut self, executor: impl HeavyExecutor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Use an executor shared with other pipelines.
    pub fn shared_executor(mut self, executor: Arc<dyn HeavyExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Send graph and round dumps to `sink`.
    pub fn diagnostics(mut self, sink: impl DiagnosticsSink) -> Self {
        self.diagnostics = Some(Arc::new(sink));
        self
    }

    /// Wire `modules` into a pipeline.
    pub fn build(self, modules: Vec<Box<dyn Module>>) -> Result<Pipeline> {
        let graph = GraphBuilder::new(self.config.requirements).build(modules)?;
        let structure = graph.snapshot();
        if let Some(sink) = &self.diagnostics {
            sink.graph(&structure);
        }

        let (parts, registry) = graph.into_parts();
        let triggers: Vec<Arc<NodeTrigger>> = parts
            .iter()
            .map(|part| {
                let trigger = NodeTrigger::new(part.before.len(), part.after.len());
                if part.deactivated {
                    trigger.set_state(NodeState::Deactivated);
                }
                Arc::new(trigger)
            })
            .collect();

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(BlockingPool::new(self.config.max_workers)));
        let cancel = CancelToken::new();
        let shared = Shared {
            cancel: cancel.clone(),
            executor,
            diagnostics: self.diagnostics,
            dump_rounds: self.config.dump_rounds,
        };

        let tasks = parts
            .into_iter()
            .map(|part| NodeTask::new(part, &triggers, shared.clone()))
            .collect();

        let (state, _) = watch::channel(PipelineState::Built);
        Ok(Pipeline {
            tasks,
            registry,
            config: self.config,
            control: Arc::new(Control {
                cancel,
                triggers,
                structure,
                state,
                live: AtomicUsize::new(0),
            }),
        })
    }
}

/// A wired set of dependency nodes, ready to run.
pub struct Pipeline {
    tasks: Vec<NodeTask>,
    registry: CellRegistry,
    config: PipelineConfig,
    control: Arc<Control>,
}

impl Pipeline {
    /// Wire `modules` with the default configuration.
    pub fn start(modules: Vec<Box<dyn Module>>) -> Result<Self> {
        PipelineBuilder::new().build(modules)
    }

    /// Configure a pipeline before wiring it.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// A handle that stops the pipeline from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// The shared cell behind a provided relation name.
    pub fn cell(&self, name: &str) -> Option<ValueCell> {
        self.registry.cell(name).cloned()
    }

    /// The cell registry.
    pub fn registry(&self) -> &CellRegistry {
        &self.registry
    }

    /// Graph structure with current counters.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.control.snapshot()
    }

    /// The configuration this pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the pipeline has no nodes.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run rounds until stopped, a module fails, or a module requests a
    /// restart.
    ///
    /// The first failure cancels every other node and is returned once all
    /// node tasks have exited. Failures reported while draining are logged
    /// and dropped.
    #[instrument(skip_all, fields(nodes = self.tasks.len()))]
    pub async fn run(self) -> Result<RunOutcome> {
        let Pipeline {
            tasks,
            config,
            control,
            ..
        } = self;

        let _stopped = StoppedGuard(&control);
        control.state.send_replace(PipelineState::Running);
        if control.cancel.is_cancelled() {
            tracing::info!("pipeline stopped before running");
            return Ok(RunOutcome::Stopped);
        }

        for trigger in &control.triggers {
            trigger.seed();
        }

        let mut set = JoinSet::new();
        for task in tasks {
            let guard = LiveGuard::new(Arc::clone(&control));
            let module = task.name().to_string();
            set.spawn(async move {
                let _guard = guard;
                AssertUnwindSafe(task.run())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(%module, "node task panicked");
                        Err(PipelineError::NodePanicked { module })
                    })
            });
        }
        tracing::info!("pipeline running");

        let mut first = None;
        if set.is_empty() {
            control.cancel.cancelled().await;
        }
        while first.is_none() && !control.cancel.is_cancelled() {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(joined) => first = settle(joined),
                    None => break,
                },
                _ = control.cancel.cancelled() => {}
            }
        }

        control.begin_shutdown();
        let deadline = Instant::now() + config.drain_timeout();
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(joined)) => record(&mut first, settle(joined)),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        remaining = set.len(),
                        timeout = ?config.drain_timeout(),
                        "drain timeout elapsed, aborting node tasks"
                    );
                    set.abort_all();
                    while let Some(joined) = set.join_next().await {
                        record(&mut first, settle(joined));
                    }
                    break;
                }
            }
        }

        tracing::info!("pipeline stopped");
        first.unwrap_or(Ok(RunOutcome::Stopped))
    }
}

/// Turn a finished node task into an outcome, if it decides the run.
fn settle(joined: std::result::Result<Result<NodeExit>, JoinError>) -> Option<Result<RunOutcome>> {
    match joined {
        Ok(Ok(NodeExit::Cancelled)) => None,
        Ok(Ok(NodeExit::Restart { module, reason })) => {
            Some(Ok(RunOutcome::Restart { module, reason }))
        }
        Ok(Err(err)) => Some(Err(err)),
        Err(err) if err.is_cancelled() => None,
        Err(err) => Some(Err(PipelineError::Worker {
            reason: err.to_string(),
        })),
    }
}

fn record(first: &mut Option<Result<RunOutcome>>, outcome: Option<Result<RunOutcome>>) {
    match (first.is_some(), outcome) {
        (_, None) => {}
        (false, outcome) => *first = outcome,
        (true, Some(ignored)) => {
            tracing::debug!(?ignored, "ignoring outcome reported while draining");
        }
    }
}

/// Stops a running pipeline from another task.
#[derive(Clone)]
pub struct StopHandle {
    control: Arc<Control>,
}

impl StopHandle {
    /// Cancel every node and wait until all node tasks exited.
    ///
    /// Idempotent. Returns immediately when the pipeline never ran.
    pub async fn stop(&self) {
        self.control.begin_shutdown();
        let mut state = self.control.state.subscribe();
        // The sender lives in `Control`, which this handle keeps alive.
        let _ = state.wait_for(|state| state.is_settled()).await;
    }

    /// Whether cancellation was requested.
    pub fn is_stopping(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    /// Whether every node task has exited.
    pub fn is_stopped(&self) -> bool {
        *self.control.state.borrow() == PipelineState::Stopped
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *self.control.state.borrow()
    }

    /// Node tasks that have not exited yet.
    pub fn live_tasks(&self) -> usize {
        self.control.live.load(Ordering::Acquire)
    }

    /// Graph structure with current counters.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.control.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleResult, RoundContext};
    use crate::relation::RelationStore;
    use futures_util::future::BoxFuture;
    use std::time::Duration;

    struct Tick;

    impl Module for Tick {
        fn declare(&mut self, relations: &mut RelationStore) -> Result<()> {
            relations.provide("tick", 0)?;
            Ok(())
        }

        fn execute<'a>(&'a mut self, ctx: &'a mut RoundContext<'_>) -> BoxFuture<'a, ModuleResult> {
            async move {
                ctx.set("tick", ctx.round())?;
                tokio::task::yield_now().await;
                Ok(())
            }
            .boxed()
        }
    }

    #[test]
    fn run_outcome_restart() {
        assert!(!RunOutcome::Stopped.is_restart());
        assert!(RunOutcome::Restart {
            module: "A".into(),
            reason: "r".into()
        }
        .is_restart());
    }

    #[tokio::test]
    async fn stop_before_run_returns_immediately() {
        let pipeline = Pipeline::start(vec![Box::new(Tick)]).unwrap();
        let handle = pipeline.stop_handle();

        handle.stop().await;
        assert!(handle.is_stopping());
        assert_eq!(handle.state(), PipelineState::Built);

        let outcome = pipeline.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        assert!(handle.is_stopped());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_node_tasks() {
        let pipeline = Pipeline::start(vec![Box::new(Tick)]).unwrap();
        let tick = pipeline.cell("tick").unwrap();
        let handle = pipeline.stop_handle();
        let run = tokio::spawn(pipeline.run());

        tokio::time::timeout(Duration::from_secs(2), async {
            while tick.get().as_u64().unwrap_or(0) < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .unwrap();
        assert_eq!(handle.live_tasks(), 0);
        assert!(handle.is_stopped());
        assert_eq!(handle.snapshot().nodes[0].state, NodeState::Cancelled);

        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn empty_pipeline_waits_for_stop() {
        let pipeline = Pipeline::start(Vec::new()).unwrap();
        assert!(pipeline.is_empty());
        let handle = pipeline.stop_handle();
        let run = tokio::spawn(pipeline.run());

        tokio::task::yield_now().await;
        assert!(!run.is_finished());

        handle.stop().await;
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Stopped);
    }
}
