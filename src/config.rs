//! # Configuration
//!
//! JSON configuration for identity verification, sessions and the decision
//! engine. Every field has a default, so `{}` is a valid document apart from
//! the signing secret, which is normally taken from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::auth::{IdentityConfig, SessionConfig};
use crate::engine::EngineConfig;
use crate::errors::{AccessError, AccessResult};
use crate::observability::LogFormat;

/// Overrides `identity.secret`
pub const ENV_JWT_SECRET: &str = "ROWGUARD_JWT_SECRET";

/// Overrides `log_format`
pub const ENV_LOG_FORMAT: &str = "ROWGUARD_LOG_FORMAT";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowguardConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Log output format (default: pretty)
    #[serde(default)]
    pub log_format: LogFormat,
}

impl RowguardConfig {
    pub fn from_json_str(json: &str) -> AccessResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| AccessError::InvalidConfig(format!("config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> AccessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AccessError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loading configuration");
        Self::from_json_str(&content)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> AccessResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_JWT_SECRET).filter(|s| !s.is_empty()) {
            debug!(var = ENV_JWT_SECRET, "identity secret taken from environment");
            self.identity.secret = secret;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log_format = format.parse()?;
        }
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(mut self) -> AccessResult<Self> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    pub fn validate(&self) -> AccessResult<()> {
        self.identity.validate()?;
        self.session.validate()?;
        self.engine.validate()
    }
}
