//! Pipeline Errors
//!
//! Every failure the engine can report, from relation declaration through
//! graph build to the running rounds.
//!
//! Build-time errors (`DuplicateRelation`, `DoubleProvide`, `CycleDetected`,
//! `UnsatisfiedRequirement`) abort pipeline construction; no partially wired
//! pipeline is ever returned. Runtime errors are collected by the pipeline and
//! the first one is surfaced after every node task has drained.

use thiserror::Error;

/// Boxed error type carried by module failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A module declared the same relation name twice.
    #[error("module '{module}' already declares relation '{name}'")]
    DuplicateRelation {
        /// The declaring module.
        module: String,
        /// The repeated relation name.
        name: String,
    },

    /// Two modules provide the same relation name.
    #[error("'{first}' and '{second}' both provide '{name}'")]
    DoubleProvide {
        /// The relation name.
        name: String,
        /// Module that declared the provide first.
        first: String,
        /// Module that declared the second provide.
        second: String,
    },

    /// The `after` edges of the graph contain a cycle.
    #[error("cycle detected: '{from}' points to '{to}'")]
    CycleDetected {
        /// Node whose edge closes the cycle.
        from: String,
        /// Node on the current DFS path that the edge points back to.
        to: String,
    },

    /// A required relation has no provider (strict mode only).
    #[error("nothing provides '{name}' required by '{module}'")]
    UnsatisfiedRequirement {
        /// The requiring module.
        module: String,
        /// The relation name nobody provides.
        name: String,
    },

    /// A module accessed a relation it never declared.
    #[error("module '{module}' has no relation '{name}'")]
    UnknownRelation {
        /// The accessing module.
        module: String,
        /// The undeclared relation name.
        name: String,
    },

    /// A module tried to write a relation it only requires.
    #[error("module '{module}' requires '{name}' and cannot write it")]
    ReadOnlyRelation {
        /// The writing module.
        module: String,
        /// The relation name.
        name: String,
    },

    /// A relation value could not be converted to or from the requested type.
    #[error("relation '{name}' holds an incompatible value: {source}")]
    ValueType {
        /// The relation name.
        name: String,
        /// Underlying conversion error.
        #[source]
        source: serde_json::Error,
    },

    /// A module's execution logic failed during a round.
    #[error("module '{module}' failed in round {round}: {source}")]
    ModuleExecution {
        /// The failing module.
        module: String,
        /// Round in which it failed.
        round: u64,
        /// The module's error.
        #[source]
        source: BoxError,
    },

    /// A node task panicked.
    #[error("node task for '{module}' panicked")]
    NodePanicked {
        /// Module wrapped by the panicking node.
        module: String,
    },

    /// The heavy-work executor could not produce a result.
    #[error("heavy-work executor failed: {reason}")]
    Worker {
        /// Why the job did not complete.
        reason: String,
    },

    /// The pipeline configuration could not be parsed.
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether this error was raised while building the graph.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRelation { .. }
                | Self::DoubleProvide { .. }
                | Self::CycleDetected { .. }
                | Self::UnsatisfiedRequirement { .. }
        )
    }
}
