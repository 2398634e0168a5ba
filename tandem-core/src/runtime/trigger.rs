//! Node Triggers
//!
//! The trigger is the part of a dependency node that other nodes touch: an
//! edge countdown, the wake-up signal, and the transient skip flag.
//!
//! # Protocol
//!
//! Each round a node resets its countdown to `before + after` edges. Every
//! neighbor, in both directions, decrements it once when it finishes its own
//! round; whoever brings it to zero signals the node. A node therefore never
//! starts round n+1 before all of its structural neighbors finished round n.
//!
//! Before the first round the countdown is seeded with the number of
//! `before` edges only, so sources fire immediately and everything else
//! waits for its providers.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

use super::event::Event;

/// Where a node task currently is in its round loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Waiting for its signal.
    Idle,

    /// Executing its module.
    Running,

    /// Never executes its module; still takes part in signaling.
    Deactivated,

    /// Exited after observing cancellation.
    Cancelled,
}

impl NodeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Deactivated,
            3 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Deactivated => 2,
            Self::Cancelled => 3,
        }
    }
}

/// Countdown, signal and skip flag of one dependency node.
#[derive(Debug)]
pub struct NodeTrigger {
    before_edges: usize,
    after_edges: usize,
    edges_to_go: AtomicUsize,
    skip: AtomicBool,
    signal: Event,
    state: AtomicU8,
    rounds: AtomicU64,
}

impl NodeTrigger {
    /// Create a trigger for a node with the given edge counts.
    pub fn new(before_edges: usize, after_edges: usize) -> Self {
        Self {
            before_edges,
            after_edges,
            edges_to_go: AtomicUsize::new(before_edges),
            skip: AtomicBool::new(false),
            signal: Event::new(),
            state: AtomicU8::new(NodeState::Idle.as_u8()),
            rounds: AtomicU64::new(0),
        }
    }

    /// Number of providers this node requires from.
    pub fn before_edges(&self) -> usize {
        self.before_edges
    }

    /// Number of consumers this node provides to.
    pub fn after_edges(&self) -> usize {
        self.after_edges
    }

    /// Decrements needed before the node may fire again.
    pub fn total_edges(&self) -> usize {
        self.before_edges + self.after_edges
    }

    /// Whether the node has no neighbors at all.
    pub fn is_isolated(&self) -> bool {
        self.total_edges() == 0
    }

    /// Current countdown value.
    pub fn edges_to_go(&self) -> usize {
        self.edges_to_go.load(Ordering::Acquire)
    }

    /// Prepare for the first round. Fires when there is nothing upstream.
    pub fn seed(&self) -> bool {
        self.edges_to_go.store(self.before_edges, Ordering::Release);
        if self.before_edges == 0 {
            self.fire();
            return true;
        }
        false
    }

    /// Reset the countdown at the start of a round.
    pub fn reset(&self) {
        self.edges_to_go.store(self.total_edges(), Ordering::Release);
    }

    /// Count one finished neighbor. Fires the node when the countdown hits
    /// zero and returns whether it did.
    pub fn decrement(&self) -> bool {
        match self
            .edges_to_go
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.fire();
                true
            }
            Ok(_) => false,
            Err(_) => {
                tracing::warn!("edge countdown decremented below zero");
                false
            }
        }
    }

    /// Wake the node.
    pub fn fire(&self) {
        self.signal.set();
    }

    /// Whether the node's signal is raised.
    pub fn is_signaled(&self) -> bool {
        self.signal.is_set()
    }

    /// Wait for the signal and consume it.
    pub async fn wait(&self) {
        self.signal.take().await;
    }

    /// Ask the node to skip its module in the coming round.
    pub fn mark_skip(&self) {
        self.skip.store(true, Ordering::Release);
    }

    /// Read and clear the skip flag.
    pub fn take_skip(&self) -> bool {
        self.skip.swap(false, Ordering::AcqRel)
    }

    /// Current state of the node task.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Rounds the node has completed.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    pub(crate) fn finish_round(&self) -> u64 {
        self.rounds.fetch_add(1, Ordering::AcqRel) + 1
    }
}
