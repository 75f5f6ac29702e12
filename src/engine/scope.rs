//! Evaluation scope handed to predicates.
//!
//! A predicate sees the caller, the candidate row, existence checks against the
//! decision's relationship snapshot, and `read_own_row`: the caller's own row
//! of a table as of decision start. Nothing else.

use std::collections::HashMap;
use tracing::warn;

use crate::auth::Identity;
use crate::policy::PredicateError;
use crate::relationship::{Edge, RelationLookup, RelationshipIndex};
use crate::row::Row;

#[derive(Debug, Clone)]
enum OwnRowState {
    Loaded(Option<Row>),
    Unavailable(String),
}

/// The caller's own rows, one per table, scoped to a single subject id
#[derive(Debug, Clone)]
pub struct OwnRows {
    subject_id: String,
    rows: HashMap<String, OwnRowState>,
}

impl OwnRows {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            rows: HashMap::new(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Record the caller's row of `table`.
    ///
    /// A row that belongs to another table or another subject is discarded and
    /// the table is recorded as having no own row. Returns whether the row was kept.
    pub fn insert(&mut self, table: &str, row: Option<Row>) -> bool {
        let kept = match row {
            Some(row) if row.id() == self.subject_id && row.table() == table => Some(row),
            Some(row) => {
                warn!(
                    table,
                    subject = %self.subject_id,
                    returned_id = row.id(),
                    "row source returned a row outside the caller's scope; ignoring it"
                );
                self.rows.insert(table.to_string(), OwnRowState::Loaded(None));
                return false;
            }
            None => None,
        };
        let found = kept.is_some();
        self.rows.insert(table.to_string(), OwnRowState::Loaded(kept));
        found
    }

    pub fn mark_unavailable(&mut self, table: &str, reason: impl Into<String>) {
        self.rows
            .insert(table.to_string(), OwnRowState::Unavailable(reason.into()));
    }

    pub fn get(&self, table: &str) -> Result<Option<&Row>, PredicateError> {
        match self.rows.get(table) {
            Some(OwnRowState::Loaded(row)) => Ok(row.as_ref()),
            Some(OwnRowState::Unavailable(reason)) => Err(PredicateError::new(format!(
                "own row of \"{}\" unavailable: {}",
                table, reason
            ))),
            None => Err(PredicateError::new(format!(
                "own row of \"{}\" was not loaded for this decision",
                table
            ))),
        }
    }
}

/// Everything predicates may read besides the identity and the row, frozen at decision start
#[derive(Debug, Clone)]
pub struct DecisionSnapshot {
    pub relationships: RelationshipIndex,
    pub own_rows: OwnRows,
}

impl DecisionSnapshot {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            relationships: RelationshipIndex::new(),
            own_rows: OwnRows::new(subject_id),
        }
    }
}

/// What a predicate can see while judging one row
pub struct EvalScope<'a> {
    identity: &'a Identity,
    row: &'a Row,
    relations: &'a dyn RelationLookup,
    own_rows: &'a OwnRows,
}

impl<'a> EvalScope<'a> {
    pub fn new(
        identity: &'a Identity,
        row: &'a Row,
        relations: &'a dyn RelationLookup,
        own_rows: &'a OwnRows,
    ) -> Self {
        Self {
            identity,
            row,
            relations,
            own_rows,
        }
    }

    pub fn identity(&self) -> &'a Identity {
        self.identity
    }

    /// `auth.uid()`
    pub fn subject_id(&self) -> &'a str {
        self.identity.subject_id()
    }

    pub fn row(&self) -> &'a Row {
        self.row
    }

    /// Is the caller linked to `other_id` in `relation`?
    pub fn exists(&self, relation: &str, other_id: &str) -> Result<bool, PredicateError> {
        self.relations
            .exists(relation, self.identity.subject_id(), other_id)
    }

    /// Is there an edge in `relation` satisfying `predicate`?
    ///
    /// Only answerable when the relation was declared with
    /// `Predicate::reads_whole_relation`; a relation loaded around the caller
    /// yields an error, which denies the row.
    pub fn exists_where(
        &self,
        relation: &str,
        predicate: &dyn Fn(&Edge) -> bool,
    ) -> Result<bool, PredicateError> {
        self.relations.exists_where(relation, predicate)
    }

    /// The caller's own row of `table` (`WHERE id = auth.uid()`), if it exists
    pub fn read_own_row(&self, table: &str) -> Result<Option<&'a Row>, PredicateError> {
        self.own_rows.get(table)
    }
}
