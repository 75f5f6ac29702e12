//! # Relationship Index
//!
//! Snapshot of relationship edges (e.g. friendships) consulted by predicates.
//!
//! ## Invariants
//! - Lookups are symmetric: edge (A, B) answers both `exists(A, B)` and `exists(B, A)`
//! - The index is immutable while a decision reads it; edges added to the
//!   source afterwards are not visible to that decision
//! - Asking about a relation that was never loaded is an error, not `false`
//! - A relation loaded only around the caller answers only questions about
//!   the caller's own edges; anything else is an error, not `false`

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::policy::PredicateError;

/// An undirected link between two identities in a relationship table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub table: String,
    pub a: String,
    pub b: String,
}

impl Edge {
    pub fn new(table: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            a: a.into(),
            b: b.into(),
        }
    }

    /// Whether `id` is one of the endpoints
    pub fn touches(&self, id: &str) -> bool {
        self.a == id || self.b == id
    }

    /// Whether the edge links `x` and `y`, in either direction
    pub fn links(&self, x: &str, y: &str) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }

    fn unordered_key(&self) -> (String, String) {
        if self.a <= self.b {
            (self.a.clone(), self.b.clone())
        } else {
            (self.b.clone(), self.a.clone())
        }
    }
}

/// Existence checks available to predicates
pub trait RelationLookup: Send + Sync {
    /// Is there an edge linking `subject_id` and `other_id` (either direction)?
    fn exists(&self, relation: &str, subject_id: &str, other_id: &str)
        -> Result<bool, PredicateError>;

    /// Is there an edge satisfying `predicate`? Needs the whole relation.
    fn exists_where(
        &self,
        relation: &str,
        predicate: &dyn Fn(&Edge) -> bool,
    ) -> Result<bool, PredicateError>;
}

#[derive(Debug, Clone)]
enum RelationState {
    Loaded {
        edges: Vec<Edge>,
        pairs: HashSet<(String, String)>,
        /// `Some(subject)` if only edges touching `subject` were loaded
        around: Option<String>,
    },
    Unavailable(String),
}

impl RelationState {
    fn empty(around: Option<String>) -> Self {
        RelationState::Loaded {
            edges: Vec::new(),
            pairs: HashSet::new(),
            around,
        }
    }
}

/// Immutable-per-decision edge snapshot
#[derive(Debug, Clone, Default)]
pub struct RelationshipIndex {
    relations: HashMap<String, RelationState>,
}

impl RelationshipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a set of edges; every table mentioned counts as loaded
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        let mut index = Self::new();
        for edge in edges {
            index.insert(edge);
        }
        index
    }

    /// Mark `relation` as loaded in full with exactly `edges` (replacing earlier state)
    pub fn load(&mut self, relation: &str, edges: impl IntoIterator<Item = Edge>) {
        self.relations
            .insert(relation.to_string(), RelationState::empty(None));
        for edge in edges.into_iter().filter(|e| e.table == relation) {
            self.insert(edge);
        }
    }

    /// Mark `relation` as loaded with the edges touching `subject_id` only.
    /// Edges not touching `subject_id` are dropped.
    pub fn load_around(
        &mut self,
        relation: &str,
        subject_id: &str,
        edges: impl IntoIterator<Item = Edge>,
    ) {
        self.relations.insert(
            relation.to_string(),
            RelationState::empty(Some(subject_id.to_string())),
        );
        for edge in edges
            .into_iter()
            .filter(|e| e.table == relation && e.touches(subject_id))
        {
            self.insert(edge);
        }
    }

    /// Record that `relation` could not be loaded for this decision
    pub fn mark_unavailable(&mut self, relation: &str, reason: impl Into<String>) {
        self.relations
            .insert(relation.to_string(), RelationState::Unavailable(reason.into()));
    }

    pub fn insert(&mut self, edge: Edge) {
        let state = self
            .relations
            .entry(edge.table.clone())
            .or_insert_with(|| RelationState::empty(None));

        if let RelationState::Loaded { edges, pairs, .. } = state {
            if pairs.insert(edge.unordered_key()) {
                edges.push(edge);
            }
        }
    }

    pub fn is_loaded(&self, relation: &str) -> bool {
        matches!(self.relations.get(relation), Some(RelationState::Loaded { .. }))
    }

    /// Number of distinct edges in `relation`
    pub fn edge_count(&self, relation: &str) -> usize {
        match self.relations.get(relation) {
            Some(RelationState::Loaded { edges, .. }) => edges.len(),
            _ => 0,
        }
    }

    /// Whether `relation` holds every edge rather than only the caller's
    pub fn is_complete(&self, relation: &str) -> bool {
        matches!(
            self.relations.get(relation),
            Some(RelationState::Loaded { around: None, .. })
        )
    }

    fn loaded(&self, relation: &str) -> Result<&RelationState, PredicateError> {
        match self.relations.get(relation) {
            Some(state @ RelationState::Loaded { .. }) => Ok(state),
            Some(RelationState::Unavailable(reason)) => Err(PredicateError::new(format!(
                "relation \"{}\" unavailable: {}",
                relation, reason
            ))),
            None => Err(PredicateError::new(format!(
                "relation \"{}\" was not loaded for this decision",
                relation
            ))),
        }
    }
}

impl RelationLookup for RelationshipIndex {
    fn exists(
        &self,
        relation: &str,
        subject_id: &str,
        other_id: &str,
    ) -> Result<bool, PredicateError> {
        let RelationState::Loaded { pairs, around, .. } = self.loaded(relation)? else {
            return Ok(false);
        };
        if let Some(loaded_for) = around {
            if loaded_for != subject_id && loaded_for != other_id {
                return Err(PredicateError::new(format!(
                    "relation \"{}\" holds only the edges of \"{}\"",
                    relation, loaded_for
                )));
            }
        }
        let key = if subject_id <= other_id {
            (subject_id.to_string(), other_id.to_string())
        } else {
            (other_id.to_string(), subject_id.to_string())
        };
        Ok(pairs.contains(&key))
    }

    fn exists_where(
        &self,
        relation: &str,
        predicate: &dyn Fn(&Edge) -> bool,
    ) -> Result<bool, PredicateError> {
        let RelationState::Loaded { edges, around, .. } = self.loaded(relation)? else {
            return Ok(false);
        };
        if let Some(loaded_for) = around {
            return Err(PredicateError::new(format!(
                "relation \"{}\" holds only the edges of \"{}\"; edge scans need the whole relation",
                relation, loaded_for
            )));
        }
        Ok(edges.iter().any(|edge| predicate(edge)))
    }
}
