//! Pipeline Configuration
//!
//! Tunables for graph building and the round scheduler. A configuration can
//! be assembled in code with the builder-style setters or loaded from JSON:
//!
//! ```rust,ignore
//! let config = PipelineConfig::from_json(r#"{ "requirements": "lenient", "max_workers": 4 }"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What the graph builder does with a requirement nobody provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementPolicy {
    /// Fail the build with `UnsatisfiedRequirement`.
    #[default]
    Strict,

    /// Deactivate the requiring node and skip its downstream consumers
    /// every round.
    Lenient,
}

/// Configuration for building and running a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Policy for unsatisfied requirements.
    pub requirements: RequirementPolicy,

    /// Number of concurrent jobs the default heavy-work pool accepts.
    pub max_workers: usize,

    /// Grace period `stop()` gives node tasks before aborting them.
    pub drain_timeout_ms: u64,

    /// Send a module snapshot to the diagnostics sink after every round.
    pub dump_rounds: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            requirements: RequirementPolicy::Strict,
            max_workers: 8,
            drain_timeout_ms: 5_000,
            dump_rounds: false,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Use the lenient requirement policy.
    pub fn lenient(mut self) -> Self {
        self.requirements = RequirementPolicy::Lenient;
        self
    }

    /// Set the heavy-work pool size. Zero is raised to one.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Set the drain grace period used by `stop()`.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable per-round module snapshots.
    pub fn with_round_dumps(mut self, enabled: bool) -> Self {
        self.dump_rounds = enabled;
        self
    }

    /// The drain grace period as a `Duration`.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict_with_eight_workers() {
        let config = PipelineConfig::default();
        assert_eq!(config.requirements, RequirementPolicy::Strict);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.drain_timeout(), Duration::from_secs(5));
        assert!(!config.dump_rounds);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(r#"{ "requirements": "lenient" }"#).unwrap();
        assert_eq!(config.requirements, RequirementPolicy::Lenient);
        assert_eq!(config.max_workers, 8);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = PipelineConfig::from_json(r#"{ "requirements": "sometimes" }"#).unwrap_err();
        assert!(matches!(err, crate::PipelineError::Config(_)));
    }

    #[test]
    fn builder_setters() {
        let config = PipelineConfig::default()
            .lenient()
            .with_max_workers(0)
            .with_drain_timeout(Duration::from_millis(250))
            .with_round_dumps(true);

        assert_eq!(config.requirements, RequirementPolicy::Lenient);
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.drain_timeout_ms, 250);
        assert!(config.dump_rounds);
    }
}
