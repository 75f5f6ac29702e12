//! # Policy Registry
//!
//! Registered policies, indexed by (table, operation).
//!
//! ## Invariants
//! - `(table, operation, name)` is unique; duplicates fail at registration
//! - `policies_for` returns policies in registration order
//! - An unregistered (table, operation) yields no policies, which the engine treats as deny
//! - A registry is immutable once published through a [`PolicyStore`]; reloading
//!   swaps in a new registry instead of mutating the current one

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

use super::spec::{parse_policy_specs, PolicySpec};
use super::types::{Operation, Policy, PolicyKey};
use crate::errors::{AccessError, AccessResult};

/// Policies for every (table, operation)
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<(String, Operation), Vec<Arc<Policy>>>,
    len: usize,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy
    pub fn register(&mut self, policy: Policy) -> AccessResult<()> {
        if policy.name().is_empty() || policy.table().is_empty() {
            return Err(AccessError::InvalidConfig(
                "policy name and table must not be empty".to_string(),
            ));
        }

        if policy.write_check().is_some() && !policy.operation().accepts_write_check() {
            return Err(AccessError::InvalidConfig(format!(
                "policy \"{}\": write checks only apply to insert and update, not {}",
                policy.name(),
                policy.operation()
            )));
        }

        let slot = self
            .policies
            .entry((policy.table().to_string(), policy.operation()))
            .or_default();

        if slot.iter().any(|existing| existing.name() == policy.name()) {
            let PolicyKey {
                table,
                operation,
                name,
            } = policy.key();
            return Err(AccessError::DuplicatePolicy {
                table,
                operation,
                name,
            });
        }

        info!(
            table = policy.table(),
            operation = policy.operation().as_str(),
            policy = policy.name(),
            predicate = %policy.predicate().description(),
            "policy registered"
        );

        slot.push(Arc::new(policy));
        self.len += 1;
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_policy(mut self, policy: Policy) -> AccessResult<Self> {
        self.register(policy)?;
        Ok(self)
    }

    /// Policies governing `operation` on `table`, in registration order
    pub fn policies_for(&self, table: &str, operation: Operation) -> &[Arc<Policy>] {
        self.policies
            .get(&(table.to_string(), operation))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, key: &PolicyKey) -> bool {
        self.policies_for(&key.table, key.operation)
            .iter()
            .any(|p| p.name() == key.name)
    }

    /// Every registered policy, ordered by table, then operation, then registration
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Policy>> {
        let mut keys: Vec<_> = self.policies.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(move |key| self.policies[key].iter())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Build a registry from configuration entries
    pub fn from_specs(specs: impl IntoIterator<Item = PolicySpec>) -> AccessResult<Self> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec.into_policy()?)?;
        }
        Ok(registry)
    }

    /// Build a registry from a JSON policy document
    pub fn from_json_str(json: &str) -> AccessResult<Self> {
        Self::from_specs(parse_policy_specs(json)?)
    }

    /// Build a registry from a JSON policy file
    pub fn from_file(path: impl AsRef<Path>) -> AccessResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AccessError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

/// Holder of the current registry snapshot
///
/// Decisions take a snapshot once and evaluate against it to completion, so a
/// concurrent [`reload`](Self::reload) never changes the policies of an
/// in-flight decision.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicyRegistry>>,
}

impl PolicyStore {
    pub fn new(registry: PolicyRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// The registry in force right now
    pub fn snapshot(&self) -> Arc<PolicyRegistry> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install a new registry, returning the one it replaced
    pub fn reload(&self, registry: PolicyRegistry) -> Arc<PolicyRegistry> {
        let next = Arc::new(registry);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let previous = std::mem::replace(&mut *guard, next);
        info!(
            previous = previous.len(),
            current = guard.len(),
            "policy registry reloaded"
        );
        previous
    }
}
