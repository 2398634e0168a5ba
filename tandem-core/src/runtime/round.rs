//! Round Protocol
//!
//! Every dependency node runs one `NodeTask` for the lifetime of the
//! pipeline. Each pass through its loop is one round:
//!
//! 1. Wait for the node's signal and consume it.
//! 2. Exit if the pipeline was cancelled.
//! 3. Reset the edge countdown to `before + after`.
//! 4. Unless the node is deactivated or flagged to skip: reset provides to
//!    their defaults and execute the module.
//! 5. If the node is deactivated, was flagged to skip, or the module asked
//!    to skip, flag every `after` neighbor to skip.
//! 6. Unless cancelled, decrement the countdown of every neighbor in both
//!    directions, signaling those that reach zero.
//! 7. A node without neighbors re-signals itself and yields to the
//!    runtime.
//!
//! The signal is consumed on wake-up rather than after step 6: once the
//! neighbors are decremented, they may finish their own round and signal
//! this node again before this task gets to run another instruction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::event::CancelToken;
use super::executor::HeavyExecutor;
use super::trigger::{NodeState, NodeTrigger};
use crate::diagnostics::{DiagnosticsSink, ModuleSnapshot};
use crate::error::{PipelineError, Result};
use crate::graph::{NodeId, NodeParts};
use crate::module::{Module, ModuleError, RoundContext};
use crate::relation::RelationStore;

/// Why a node task ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeExit {
    /// The task observed cancellation.
    Cancelled,

    /// The module requested a stop-and-restart.
    Restart {
        module: String,
        reason: String,
    },
}

/// What one executed round produced.
enum RoundOutcome {
    Completed { skipped: bool },
    Restart(String),
}

/// Everything a node task needs from the rest of the pipeline.
#[derive(Clone)]
pub(crate) struct Shared {
    pub cancel: CancelToken,
    pub executor: Arc<dyn HeavyExecutor>,
    pub diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    pub dump_rounds: bool,
}

/// The perpetual task driving one dependency node.
pub(crate) struct NodeTask {
    id: NodeId,
    module: Box<dyn Module>,
    relations: RelationStore,
    deactivated: bool,
    trigger: Arc<NodeTrigger>,
    after: Vec<Arc<NodeTrigger>>,
    before: Vec<Arc<NodeTrigger>>,
    shared: Shared,
}

impl NodeTask {
    /// Assemble the task for `parts`. `triggers` is indexed by node ID.
    pub fn new(parts: NodeParts, triggers: &[Arc<NodeTrigger>], shared: Shared) -> Self {
        let neighbors = |ids: &[NodeId]| -> Vec<Arc<NodeTrigger>> {
            ids.iter()
                .map(|id| Arc::clone(&triggers[id.index()]))
                .collect()
        };

        Self {
            id: parts.id,
            after: neighbors(&parts.after),
            before: neighbors(&parts.before),
            trigger: Arc::clone(&triggers[parts.id.index()]),
            module: parts.module,
            relations: parts.relations,
            deactivated: parts.deactivated,
            shared,
        }
    }

    /// Name of the wrapped module.
    pub fn name(&self) -> &str {
        self.relations.module_name()
    }

    /// Run rounds until cancelled, restarted or failed.
    pub async fn run(mut self) -> Result<NodeExit> {
        tracing::debug!(
            module = %self.name(),
            node = %self.id,
            after = self.after.len(),
            before = self.before.len(),
            deactivated = self.deactivated,
            "node task started"
        );

        loop {
            self.trigger.set_state(self.resting_state());
            self.trigger.wait().await;

            if self.shared.cancel.is_cancelled() {
                return Ok(self.cancelled());
            }

            self.trigger.reset();
            let round = self.trigger.rounds();
            let flagged = self.trigger.take_skip();

            let skipped = if self.deactivated || flagged {
                self.dump(round, true, Duration::ZERO);
                true
            } else {
                match self.execute(round).await? {
                    RoundOutcome::Completed { skipped } => skipped,
                    RoundOutcome::Restart(reason) => {
                        tracing::info!(module = %self.name(), round, %reason, "restart requested");
                        return Ok(NodeExit::Restart {
                            module: self.name().to_string(),
                            reason,
                        });
                    }
                }
            };

            if skipped {
                for peer in &self.after {
                    peer.mark_skip();
                }
            }

            if self.shared.cancel.is_cancelled() {
                return Ok(self.cancelled());
            }

            for peer in self.after.iter().chain(&self.before) {
                peer.decrement();
            }
            self.trigger.finish_round();

            if self.trigger.is_isolated() {
                self.trigger.fire();
                // The signal is already up, so the next wait returns at once.
                tokio::task::yield_now().await;
            }
        }
    }

    /// Execute the module for one round.
    async fn execute(&mut self, round: u64) -> Result<RoundOutcome> {
        self.trigger.set_state(NodeState::Running);
        self.relations.reset_provides();

        let started = Instant::now();
        let mut ctx = RoundContext::new(&self.relations, &self.shared.executor, round);
        let result = self.module.execute(&mut ctx).await;
        let skipped = ctx.skip_requested();
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {}
            Err(ModuleError::Restart { reason }) => return Ok(RoundOutcome::Restart(reason)),
            Err(ModuleError::Failed(source)) => {
                tracing::error!(
                    module = %self.name(),
                    round,
                    error = %source,
                    "module execution failed"
                );
                return Err(PipelineError::ModuleExecution {
                    module: self.name().to_string(),
                    round,
                    source,
                });
            }
        }

        tracing::debug!(module = %self.name(), round, ?elapsed, skipped, "round complete");
        self.dump(round, skipped, elapsed);
        Ok(RoundOutcome::Completed { skipped })
    }

    fn dump(&self, round: u64, skipped: bool, elapsed: Duration) {
        if !self.shared.dump_rounds {
            return;
        }
        if let Some(sink) = &self.shared.diagnostics {
            sink.round(&ModuleSnapshot::capture(&self.relations, round, skipped, elapsed));
        }
    }

    fn resting_state(&self) -> NodeState {
        if self.deactivated {
            NodeState::Deactivated
        } else {
            NodeState::Idle
        }
    }

    fn cancelled(&self) -> NodeExit {
        self.trigger.set_state(NodeState::Cancelled);
        tracing::debug!(module = %self.name(), rounds = self.trigger.rounds(), "node task cancelled");
        NodeExit::Cancelled
    }
}
