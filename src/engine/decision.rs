//! # Decision Engine
//!
//! Combines the policies of a (table, operation) into a single decision.
//!
//! ## Invariants
//! - Policies are permissive: a row is visible (or a write permitted) iff at least one policy grants it
//! - No policies means deny, except for a service-role identity when bypass is enabled
//! - Each decision evaluates against one registry snapshot and one relationship/own-row snapshot
//! - A failed, slow or cancelled collaborator denies; it never grants

use futures_util::future::{join, join_all};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::config::EngineConfig;
use super::evaluator::{Diagnostic, PredicateEvaluator};
use super::events::DecisionEvent;
use super::scope::DecisionSnapshot;
use crate::auth::Identity;
use crate::errors::{AccessError, AccessResult};
use crate::policy::{Dependencies, Operation, Policy, PolicyStore, WriteOperation};
use crate::relationship::RelationshipSource;
use crate::row::Row;
use crate::source::RowSource;

/// Rows a read may return, plus any predicate failures met on the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOutcome {
    pub rows: Vec<Row>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReadOutcome {
    fn denied() -> Self {
        Self::default()
    }

    fn extend(&mut self, other: ReadOutcome) {
        self.rows.extend(other.rows);
        self.diagnostics.extend(other.diagnostics);
    }
}

/// Permission to perform one write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permit {
    pub table: String,
    pub operation: WriteOperation,
    /// The policy that granted the write; `None` for a service-role bypass
    pub granted_by: Option<String>,
}

/// Row filter and write authorizer
pub struct DecisionEngine {
    policies: Arc<PolicyStore>,
    relationships: Arc<dyn RelationshipSource>,
    rows: Arc<dyn RowSource>,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(
        policies: Arc<PolicyStore>,
        relationships: Arc<dyn RelationshipSource>,
        rows: Arc<dyn RowSource>,
        config: EngineConfig,
    ) -> Self {
        Self {
            policies,
            relationships,
            rows,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    /// Keep the candidate rows `identity` may see.
    ///
    /// Denied rows are dropped silently. Order of the remaining rows is preserved.
    pub async fn filter_for_read(
        &self,
        identity: &Identity,
        table: &str,
        candidates: Vec<Row>,
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        if cancel.is_cancelled() {
            self.cancelled(identity, table);
            return ReadOutcome::denied();
        }

        let candidates = retain_table(table, candidates);

        if self.bypasses(identity) {
            DecisionEvent::Bypassed {
                table: table.to_string(),
                subject: identity.subject_id().to_string(),
            }
            .emit();
            return ReadOutcome {
                rows: candidates,
                diagnostics: Vec::new(),
            };
        }

        let registry = self.policies.snapshot();
        let policies: Arc<[Arc<Policy>]> = registry.policies_for(table, Operation::Select).into();
        if policies.is_empty() {
            debug!(%table, "no select policies; denying all rows");
            return ReadOutcome::denied();
        }

        let snapshot = match self.load_snapshot(identity, table, &policies, cancel).await {
            Some(snapshot) => Arc::new(snapshot),
            None => {
                self.cancelled(identity, table);
                return ReadOutcome::denied();
            }
        };

        let candidate_count = candidates.len();
        let outcome = if candidate_count <= self.config.parallel_threshold {
            judge_rows(identity, &policies, &snapshot, candidates, cancel)
        } else {
            self.judge_on_workers(identity, policies, snapshot, candidates, cancel)
                .await
        };

        if cancel.is_cancelled() {
            self.cancelled(identity, table);
            return ReadOutcome::denied();
        }

        DecisionEvent::RowsFiltered {
            table: table.to_string(),
            subject: identity.subject_id().to_string(),
            candidates: candidate_count,
            visible: outcome.rows.len(),
        }
        .emit();
        outcome
    }

    /// Decide whether `identity` may perform `operation` on `table`.
    ///
    /// - insert: a policy's predicate and write check must both hold on `post_image`
    /// - update: a policy's predicate must hold on `target` and its write check on `post_image`
    /// - delete: a policy's predicate must hold on `target`
    pub async fn authorize_write(
        &self,
        identity: &Identity,
        table: &str,
        operation: WriteOperation,
        target: Option<&Row>,
        post_image: Option<&Row>,
        cancel: &CancellationToken,
    ) -> AccessResult<Permit> {
        let (subject_row, checked_row) = write_images(table, operation, target, post_image)?;

        if cancel.is_cancelled() {
            self.cancelled(identity, table);
            return Err(AccessError::Cancelled);
        }

        if self.bypasses(identity) {
            DecisionEvent::Bypassed {
                table: table.to_string(),
                subject: identity.subject_id().to_string(),
            }
            .emit();
            return Ok(Permit {
                table: table.to_string(),
                operation,
                granted_by: None,
            });
        }

        let registry = self.policies.snapshot();
        let policies = registry.policies_for(table, operation.into());
        if policies.is_empty() {
            return Err(self.denied(identity, table, operation));
        }

        let snapshot = match self.load_snapshot(identity, table, policies, cancel).await {
            Some(snapshot) => snapshot,
            None => {
                self.cancelled(identity, table);
                return Err(AccessError::Cancelled);
            }
        };

        for policy in policies {
            let granted = PredicateEvaluator::evaluate(
                policy,
                identity,
                subject_row,
                &snapshot.relationships,
                &snapshot.own_rows,
            );
            if !granted.allowed {
                continue;
            }

            if let Some(post_image) = checked_row {
                let checked = PredicateEvaluator::evaluate_write_check(
                    policy,
                    identity,
                    post_image,
                    &snapshot.relationships,
                    &snapshot.own_rows,
                );
                if !checked.allowed {
                    debug!(policy = %policy.name(), %table, "write check rejected post-image");
                    continue;
                }
            }

            if cancel.is_cancelled() {
                self.cancelled(identity, table);
                return Err(AccessError::Cancelled);
            }

            DecisionEvent::WriteGranted {
                table: table.to_string(),
                subject: identity.subject_id().to_string(),
                operation,
                policy: policy.name().to_string(),
            }
            .emit();
            return Ok(Permit {
                table: table.to_string(),
                operation,
                granted_by: Some(policy.name().to_string()),
            });
        }

        Err(self.denied(identity, table, operation))
    }

    fn bypasses(&self, identity: &Identity) -> bool {
        identity.is_service_role() && self.config.allow_service_role_bypass
    }

    fn denied(&self, identity: &Identity, table: &str, operation: WriteOperation) -> AccessError {
        DecisionEvent::WriteDenied {
            table: table.to_string(),
            subject: identity.subject_id().to_string(),
            operation,
        }
        .emit();
        AccessError::AccessDenied
    }

    fn cancelled(&self, identity: &Identity, table: &str) {
        DecisionEvent::Cancelled {
            table: table.to_string(),
            subject: identity.subject_id().to_string(),
        }
        .emit();
    }

    /// Load the relationship edges and own rows the policies read.
    ///
    /// Returns `None` if the caller cancelled while loading. A source that errors
    /// or misses its deadline is recorded as unavailable in the snapshot.
    async fn load_snapshot(
        &self,
        identity: &Identity,
        table: &str,
        policies: &[Arc<Policy>],
        cancel: &CancellationToken,
    ) -> Option<DecisionSnapshot> {
        let mut dependencies = Dependencies::default();
        for policy in policies {
            dependencies.merge(&policy.dependencies());
        }

        let subject = identity.subject_id();
        let deadline = self.config.source_timeout();
        let mut snapshot = DecisionSnapshot::new(subject);
        if dependencies.is_empty() {
            return Some(snapshot);
        }

        let relation_loads = dependencies.relations.iter().map(|relation| {
            let whole = dependencies.whole_relations.contains(relation);
            async move {
                let fetch = if whole {
                    self.relationships.edges_of(relation)
                } else {
                    self.relationships.edges_touching(relation, subject)
                };
                (relation, whole, timeout(deadline, fetch).await)
            }
        });
        let own_row_loads = dependencies.own_rows.iter().map(|own_table| async move {
            let loaded = timeout(deadline, self.rows.fetch_own_row(own_table, subject)).await;
            (own_table, loaded)
        });

        let (relations, own_rows) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            loaded = join(join_all(relation_loads), join_all(own_row_loads)) => loaded,
        };

        for (relation, whole, loaded) in relations {
            match flatten(loaded, deadline.as_millis()) {
                Ok(edges) if whole => snapshot.relationships.load(relation, edges),
                Ok(edges) => snapshot.relationships.load_around(relation, subject, edges),
                Err(reason) => {
                    DecisionEvent::SourceUnavailable {
                        table: table.to_string(),
                        source: format!("relation {}", relation),
                        reason: reason.clone(),
                    }
                    .emit();
                    snapshot.relationships.mark_unavailable(relation, reason);
                }
            }
        }

        for (own_table, loaded) in own_rows {
            match flatten(loaded, deadline.as_millis()) {
                Ok(row) => {
                    snapshot.own_rows.insert(own_table, row);
                }
                Err(reason) => {
                    DecisionEvent::SourceUnavailable {
                        table: table.to_string(),
                        source: format!("own row of {}", own_table),
                        reason: reason.clone(),
                    }
                    .emit();
                    snapshot.own_rows.mark_unavailable(own_table, reason);
                }
            }
        }

        Some(snapshot)
    }

    /// Split the candidates into ordered chunks and judge them on blocking workers
    async fn judge_on_workers(
        &self,
        identity: &Identity,
        policies: Arc<[Arc<Policy>]>,
        snapshot: Arc<DecisionSnapshot>,
        candidates: Vec<Row>,
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        let workers = self.config.max_workers.max(1);
        let chunk_size = candidates.len().div_ceil(workers).max(1);

        let mut chunks = Vec::with_capacity(workers);
        let mut rows = candidates.into_iter().peekable();
        while rows.peek().is_some() {
            chunks.push(rows.by_ref().take(chunk_size).collect::<Vec<_>>());
        }

        let tasks = chunks.into_iter().map(|chunk| {
            let identity = identity.clone();
            let policies = Arc::clone(&policies);
            let snapshot = Arc::clone(&snapshot);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                judge_rows(&identity, &policies, &snapshot, chunk, &cancel)
            })
        });

        let mut outcome = ReadOutcome::default();
        for joined in join_all(tasks).await {
            match joined {
                Ok(part) => outcome.extend(part),
                Err(e) => error!(error = %e, "row worker failed; denying its rows"),
            }
        }
        outcome
    }
}

/// Judge rows in order on the current thread
fn judge_rows(
    identity: &Identity,
    policies: &[Arc<Policy>],
    snapshot: &DecisionSnapshot,
    rows: Vec<Row>,
    cancel: &CancellationToken,
) -> ReadOutcome {
    let mut outcome = ReadOutcome::default();
    for row in rows {
        if cancel.is_cancelled() {
            return ReadOutcome::denied();
        }
        if judge_row(identity, policies, snapshot, &row, &mut outcome.diagnostics) {
            outcome.rows.push(row);
        }
    }
    outcome
}

fn judge_row(
    identity: &Identity,
    policies: &[Arc<Policy>],
    snapshot: &DecisionSnapshot,
    row: &Row,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    for policy in policies {
        let evaluation = PredicateEvaluator::evaluate(
            policy,
            identity,
            row,
            &snapshot.relationships,
            &snapshot.own_rows,
        );
        if let Some(diagnostic) = evaluation.diagnostic {
            diagnostics.push(diagnostic);
        }
        if evaluation.allowed {
            return true;
        }
    }
    false
}

fn retain_table(table: &str, candidates: Vec<Row>) -> Vec<Row> {
    candidates
        .into_iter()
        .filter(|row| {
            let matches = row.table() == table;
            if !matches {
                debug!(%table, row_table = %row.table(), row = %row.id(), "dropping candidate from another table");
            }
            matches
        })
        .collect()
}

/// Pick the row the predicate judges and the row the write check judges
fn write_images<'r>(
    table: &str,
    operation: WriteOperation,
    target: Option<&'r Row>,
    post_image: Option<&'r Row>,
) -> AccessResult<(&'r Row, Option<&'r Row>)> {
    let missing = |what: &str| AccessError::InvalidRequest(format!("{} requires {}", operation, what));

    let images = match operation {
        WriteOperation::Insert => {
            let post_image = post_image.ok_or_else(|| missing("a post-image"))?;
            (post_image, Some(post_image))
        }
        WriteOperation::Update => {
            let target = target.ok_or_else(|| missing("a target row"))?;
            let post_image = post_image.ok_or_else(|| missing("a post-image"))?;
            (target, Some(post_image))
        }
        WriteOperation::Delete => (target.ok_or_else(|| missing("a target row"))?, None),
    };

    for row in [Some(images.0), images.1].into_iter().flatten() {
        if row.table() != table {
            return Err(AccessError::InvalidRequest(format!(
                "row {} belongs to {}, not {}",
                row.id(),
                row.table(),
                table
            )));
        }
    }
    Ok(images)
}

fn flatten<T>(
    loaded: Result<AccessResult<T>, tokio::time::error::Elapsed>,
    deadline_ms: u128,
) -> Result<T, String> {
    match loaded {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}ms", deadline_ms)),
    }
}
