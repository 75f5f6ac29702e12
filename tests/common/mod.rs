//! Shared fixtures: the profiles/friendships schema with its policies.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rowguard::engine::{DecisionEngine, EngineConfig, ReadOutcome};
use rowguard::policy::{PolicyRegistry, PolicyStore};
use rowguard::relationship::{Edge, MemoryRelationshipSource, RelationshipSource};
use rowguard::source::{MemoryRowSource, RowSource, SourceFuture};
use rowguard::{AccessError, Row};
use serde_json::json;

pub const SECRET: &str = "test-secret-key-for-integration-tests";

pub const SELF_READ: &str = r#"[
    { "name": "users_read_own_profile", "table": "profiles", "operation": "select",
      "using": { "type": "subject_equals_field", "field": "id" } }
]"#;

pub const FRIENDS_READ: &str = r#"[
    { "name": "users_read_own_profile", "table": "profiles", "operation": "select",
      "using": { "type": "subject_equals_field", "field": "id" } },
    { "name": "friends_read_profile", "table": "profiles", "operation": "select",
      "using": { "type": "related", "relation": "friendships", "field": "id" } }
]"#;

pub const ADMIN_READ: &str = r#"[
    { "name": "users_read_own_profile", "table": "profiles", "operation": "select",
      "using": { "type": "subject_equals_field", "field": "id" } },
    { "name": "friends_read_profile", "table": "profiles", "operation": "select",
      "using": { "type": "related", "relation": "friendships", "field": "id" } },
    { "name": "admins_read_all_profiles", "table": "profiles", "operation": "select",
      "using": { "type": "own_row_field_equals", "table": "profiles", "field": "role", "value": "admin" } }
]"#;

pub fn registry(json: &str) -> PolicyRegistry {
    PolicyRegistry::from_json_str(json).unwrap()
}

pub fn profile(id: &str, role: &str) -> Row {
    Row::new("profiles", id)
        .with_field("role", json!(role))
        .with_field("display_name", json!(id))
}

/// alice, bob and carol, all plain users
pub fn people() -> Vec<Row> {
    vec![
        profile("alice", "user"),
        profile("bob", "user"),
        profile("carol", "user"),
    ]
}

pub fn row_source(rows: impl IntoIterator<Item = Row>) -> Arc<MemoryRowSource> {
    let source = MemoryRowSource::new();
    for row in rows {
        source.upsert(row).unwrap();
    }
    Arc::new(source)
}

pub fn friendships(pairs: &[(&str, &str)]) -> Arc<MemoryRelationshipSource> {
    Arc::new(MemoryRelationshipSource::from_edges(
        pairs.iter().map(|(a, b)| Edge::new("friendships", *a, *b)),
    ))
}

pub struct Fixture {
    pub store: Arc<PolicyStore>,
    pub relationships: Arc<MemoryRelationshipSource>,
    pub rows: Arc<MemoryRowSource>,
    pub engine: DecisionEngine,
}

impl Fixture {
    pub fn new(policies: &str, pairs: &[(&str, &str)], rows: Vec<Row>) -> Self {
        let store = Arc::new(PolicyStore::new(registry(policies)));
        let relationships = friendships(pairs);
        let rows = row_source(rows);
        let engine = DecisionEngine::new(
            Arc::clone(&store),
            relationships.clone(),
            rows.clone(),
            EngineConfig::default(),
        );
        Self {
            store,
            relationships,
            rows,
            engine,
        }
    }
}

pub fn engine_with(
    registry: PolicyRegistry,
    relationships: Arc<dyn RelationshipSource>,
    rows: Arc<dyn RowSource>,
    config: EngineConfig,
) -> DecisionEngine {
    DecisionEngine::new(Arc::new(PolicyStore::new(registry)), relationships, rows, config)
}

pub fn ids(outcome: &ReadOutcome) -> Vec<&str> {
    outcome.rows.iter().map(|r| r.id()).collect()
}

// =============================================================================
// Misbehaving collaborators
// =============================================================================

/// Relationship source that answers only after `delay`
pub struct SlowRelationships {
    pub inner: MemoryRelationshipSource,
    pub delay: Duration,
}

impl RelationshipSource for SlowRelationships {
    fn edges_touching<'a>(&'a self, relation: &'a str, subject_id: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.edges_touching(relation, subject_id).await
        })
    }

    fn edges_of<'a>(&'a self, relation: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.edges_of(relation).await
        })
    }
}

/// Relationship source that always fails
pub struct BrokenRelationships;

impl RelationshipSource for BrokenRelationships {
    fn edges_touching<'a>(&'a self, _relation: &'a str, _subject_id: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async { Err(AccessError::SourceUnavailable("connection refused".to_string())) })
    }

    fn edges_of<'a>(&'a self, _relation: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async { Err(AccessError::SourceUnavailable("connection refused".to_string())) })
    }
}

/// Row source that ignores the requested subject and always returns `row`
pub struct WrongRowSource {
    pub row: Row,
}

impl RowSource for WrongRowSource {
    fn fetch_own_row<'a>(&'a self, _table: &'a str, _subject_id: &'a str) -> SourceFuture<'a, Option<Row>> {
        let row = self.row.clone();
        Box::pin(async move { Ok(Some(row)) })
    }
}

/// Relationship source that signals when it is entered and waits to be released
pub struct GatedRelationships {
    pub inner: MemoryRelationshipSource,
    pub entered: tokio::sync::Notify,
    pub release: tokio::sync::Notify,
}

impl GatedRelationships {
    pub fn new(inner: MemoryRelationshipSource) -> Self {
        Self {
            inner,
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        }
    }

    pub fn wait_entered(&self) -> impl Future<Output = ()> + '_ {
        self.entered.notified()
    }
}

impl RelationshipSource for GatedRelationships {
    fn edges_touching<'a>(&'a self, relation: &'a str, subject_id: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async move {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.edges_touching(relation, subject_id).await
        })
    }

    fn edges_of<'a>(&'a self, relation: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async move {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.edges_of(relation).await
        })
    }
}
