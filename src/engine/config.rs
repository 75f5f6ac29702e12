//! Decision engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AccessError, AccessResult};

/// Decision engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-call deadline for relationship and row sources (default: 2000ms)
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Candidate count above which rows are judged on worker threads (default: 64)
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Upper bound on worker chunks per read (default: available parallelism)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Let service-role identities skip policy evaluation (default: true)
    #[serde(default = "default_allow_service_role_bypass")]
    pub allow_service_role_bypass: bool,
}

fn default_source_timeout_ms() -> u64 {
    2000
}

fn default_parallel_threshold() -> usize {
    64
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_allow_service_role_bypass() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            parallel_threshold: default_parallel_threshold(),
            max_workers: default_max_workers(),
            allow_service_role_bypass: default_allow_service_role_bypass(),
        }
    }
}

impl EngineConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn validate(&self) -> AccessResult<()> {
        if self.source_timeout_ms == 0 {
            return Err(AccessError::InvalidConfig(
                "engine.source_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(AccessError::InvalidConfig(
                "engine.max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
