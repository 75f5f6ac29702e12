//! Relationship source boundary.

use std::sync::RwLock;
use tracing::debug;

use super::index::Edge;
use crate::errors::{AccessError, AccessResult};
use crate::source::SourceFuture;

/// Storage-side edge lookup
pub trait RelationshipSource: Send + Sync {
    /// Edges of `relation` having `subject_id` as either endpoint
    fn edges_touching<'a>(&'a self, relation: &'a str, subject_id: &'a str) -> SourceFuture<'a, Vec<Edge>>;

    /// Every edge of `relation`
    fn edges_of<'a>(&'a self, relation: &'a str) -> SourceFuture<'a, Vec<Edge>>;
}

/// In-memory edge store
#[derive(Debug, Default)]
pub struct MemoryRelationshipSource {
    edges: RwLock<Vec<Edge>>,
}

impl MemoryRelationshipSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        Self {
            edges: RwLock::new(edges.into_iter().collect()),
        }
    }

    /// Add an edge; returns false if the pair is already linked
    pub fn add_edge(&self, edge: Edge) -> AccessResult<bool> {
        let mut edges = self.edges.write().map_err(poisoned)?;
        if edges
            .iter()
            .any(|e| e.table == edge.table && e.links(&edge.a, &edge.b))
        {
            return Ok(false);
        }
        debug!(relation = %edge.table, a = %edge.a, b = %edge.b, "edge added");
        edges.push(edge);
        Ok(true)
    }

    /// Remove the edge linking `x` and `y` (either direction)
    pub fn remove_edge(&self, relation: &str, x: &str, y: &str) -> AccessResult<bool> {
        let mut edges = self.edges.write().map_err(poisoned)?;
        let before = edges.len();
        edges.retain(|e| !(e.table == relation && e.links(x, y)));
        Ok(edges.len() != before)
    }

    pub fn len(&self) -> AccessResult<usize> {
        Ok(self.edges.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> AccessResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned<T>(_: T) -> AccessError {
    AccessError::StorageError("Lock poisoned".to_string())
}

impl RelationshipSource for MemoryRelationshipSource {
    fn edges_touching<'a>(&'a self, relation: &'a str, subject_id: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async move {
            let edges = self.edges.read().map_err(poisoned)?;
            Ok(edges
                .iter()
                .filter(|e| e.table == relation && e.touches(subject_id))
                .cloned()
                .collect())
        })
    }

    fn edges_of<'a>(&'a self, relation: &'a str) -> SourceFuture<'a, Vec<Edge>> {
        Box::pin(async move {
            let edges = self.edges.read().map_err(poisoned)?;
            Ok(edges.iter().filter(|e| e.table == relation).cloned().collect())
        })
    }
}
