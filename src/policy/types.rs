//! Policy data model.
//!
//! A policy is a plain record: a name, the (table, operation) it applies to,
//! a predicate deciding *who* may act on a row, and for writes an optional
//! write check constraining *what* the resulting row may look like.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::expr::Expr;
use crate::engine::EvalScope;

/// Operation a policy governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Select,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Whether policies for this operation may carry a write check
    pub fn accepts_write_check(&self) -> bool {
        matches!(self, Operation::Insert | Operation::Update)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutating subset of [`Operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Insert,
    Update,
    Delete,
}

impl From<WriteOperation> for Operation {
    fn from(op: WriteOperation) -> Self {
        match op {
            WriteOperation::Insert => Operation::Insert,
            WriteOperation::Update => Operation::Update,
            WriteOperation::Delete => Operation::Delete,
        }
    }
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Operation::from(*self).fmt(f)
    }
}

/// Failure raised by a predicate while it was being evaluated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PredicateError(String);

impl PredicateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// External state a predicate reads besides the identity and the row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    /// Relationship tables consulted through existence checks
    pub relations: BTreeSet<String>,

    /// Subset of `relations` scanned edge by edge, loaded in full rather than
    /// only around the caller
    pub whole_relations: BTreeSet<String>,

    /// Tables whose caller-owned row is read by self-referential checks
    pub own_rows: BTreeSet<String>,
}

impl Dependencies {
    pub fn merge(&mut self, other: &Dependencies) {
        self.relations.extend(other.relations.iter().cloned());
        self.whole_relations
            .extend(other.whole_relations.iter().cloned());
        self.own_rows.extend(other.own_rows.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty() && self.own_rows.is_empty()
    }
}

/// Signature of a native predicate
pub type PredicateFn = dyn Fn(&EvalScope<'_>) -> Result<bool, PredicateError> + Send + Sync;

/// A boolean test over (identity, row, lookups)
#[derive(Clone)]
pub enum Predicate {
    /// Declarative expression; dependencies are derived from the expression
    Expr(Expr),

    /// Rust closure; dependencies must be declared with `reads_relation`,
    /// `reads_whole_relation` or `reads_own_row`
    Native {
        description: String,
        dependencies: Dependencies,
        func: Arc<PredicateFn>,
    },
}

impl Predicate {
    pub fn native<F>(description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EvalScope<'_>) -> Result<bool, PredicateError> + Send + Sync + 'static,
    {
        Predicate::Native {
            description: description.into(),
            dependencies: Dependencies::default(),
            func: Arc::new(func),
        }
    }

    /// Declare a relationship table the native predicate consults.
    /// Expressions derive this themselves, so it is a no-op for them.
    pub fn reads_relation(mut self, relation: impl Into<String>) -> Self {
        if let Predicate::Native { dependencies, .. } = &mut self {
            dependencies.relations.insert(relation.into());
        }
        self
    }

    /// Declare a relationship table the native predicate scans with
    /// `exists_where`. Every edge of it is loaded, not just the caller's.
    pub fn reads_whole_relation(mut self, relation: impl Into<String>) -> Self {
        if let Predicate::Native { dependencies, .. } = &mut self {
            let relation = relation.into();
            dependencies.relations.insert(relation.clone());
            dependencies.whole_relations.insert(relation);
        }
        self
    }

    /// Declare a table whose caller-owned row the native predicate reads.
    pub fn reads_own_row(mut self, table: impl Into<String>) -> Self {
        if let Predicate::Native { dependencies, .. } = &mut self {
            dependencies.own_rows.insert(table.into());
        }
        self
    }

    pub fn dependencies(&self) -> Dependencies {
        match self {
            Predicate::Expr(expr) => expr.dependencies(),
            Predicate::Native { dependencies, .. } => dependencies.clone(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Predicate::Expr(expr) => expr.to_string(),
            Predicate::Native { description, .. } => description.clone(),
        }
    }

    pub(crate) fn check(&self, scope: &EvalScope<'_>) -> Result<bool, PredicateError> {
        match self {
            Predicate::Expr(expr) => expr.evaluate(scope),
            Predicate::Native { func, .. } => func(scope),
        }
    }
}

impl From<Expr> for Predicate {
    fn from(expr: Expr) -> Self {
        Predicate::Expr(expr)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Predicate::Native {
                description,
                dependencies,
                ..
            } => f
                .debug_struct("Native")
                .field("description", description)
                .field("dependencies", dependencies)
                .finish_non_exhaustive(),
        }
    }
}

/// Unique identity of a registered policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey {
    pub table: String,
    pub operation: Operation,
    pub name: String,
}

/// A named, operation-scoped access predicate over rows of a table
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    table: String,
    operation: Operation,
    predicate: Predicate,
    write_check: Option<Predicate>,
}

impl Policy {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        operation: Operation,
        predicate: impl Into<Predicate>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            operation,
            predicate: predicate.into(),
            write_check: None,
        }
    }

    pub fn select(name: impl Into<String>, table: impl Into<String>, predicate: impl Into<Predicate>) -> Self {
        Self::new(name, table, Operation::Select, predicate)
    }

    pub fn insert(name: impl Into<String>, table: impl Into<String>, predicate: impl Into<Predicate>) -> Self {
        Self::new(name, table, Operation::Insert, predicate)
    }

    pub fn update(name: impl Into<String>, table: impl Into<String>, predicate: impl Into<Predicate>) -> Self {
        Self::new(name, table, Operation::Update, predicate)
    }

    pub fn delete(name: impl Into<String>, table: impl Into<String>, predicate: impl Into<Predicate>) -> Self {
        Self::new(name, table, Operation::Delete, predicate)
    }

    /// Constrain the post-image of inserts/updates permitted by this policy
    pub fn with_write_check(mut self, check: impl Into<Predicate>) -> Self {
        self.write_check = Some(check.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn write_check(&self) -> Option<&Predicate> {
        self.write_check.as_ref()
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey {
            table: self.table.clone(),
            operation: self.operation,
            name: self.name.clone(),
        }
    }

    /// Everything the predicate and write check read
    pub fn dependencies(&self) -> Dependencies {
        let mut deps = self.predicate.dependencies();
        if let Some(check) = &self.write_check {
            deps.merge(&check.dependencies());
        }
        deps
    }
}
