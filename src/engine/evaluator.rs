//! # Predicate Evaluator
//!
//! Runs one policy's predicate (or write check) against one row.
//!
//! ## Invariants
//! - A predicate that errors or panics counts as `false` for that policy only
//! - The failure is returned as a [`Diagnostic`]; it never aborts the caller's loop
//! - Evaluation reads only the identity, the row and the decision snapshot

use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

use super::scope::{EvalScope, OwnRows};
use crate::auth::Identity;
use crate::errors::AccessError;
use crate::policy::{Policy, Predicate, PredicateError};
use crate::relationship::RelationLookup;
use crate::row::Row;

/// Non-fatal report of a predicate that failed during evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub policy: String,
    pub table: String,
    pub row_id: String,
    pub message: String,
}

impl Diagnostic {
    pub fn into_error(self) -> AccessError {
        AccessError::PredicateEvaluation {
            policy: self.policy,
            message: self.message,
        }
    }
}

/// Outcome of one predicate against one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub allowed: bool,
    pub diagnostic: Option<Diagnostic>,
}

impl Evaluation {
    fn allowed(allowed: bool) -> Self {
        Self {
            allowed,
            diagnostic: None,
        }
    }

    fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            allowed: false,
            diagnostic: Some(diagnostic),
        }
    }
}

pub struct PredicateEvaluator;

impl PredicateEvaluator {
    /// Evaluate `policy`'s predicate for `row`
    pub fn evaluate(
        policy: &Policy,
        identity: &Identity,
        row: &Row,
        lookup: &dyn RelationLookup,
        own_rows: &OwnRows,
    ) -> Evaluation {
        let scope = EvalScope::new(identity, row, lookup, own_rows);
        Self::run(policy, policy.predicate(), &scope)
    }

    /// Evaluate `policy`'s write check against a post-image. Policies without one pass.
    pub fn evaluate_write_check(
        policy: &Policy,
        identity: &Identity,
        post_image: &Row,
        lookup: &dyn RelationLookup,
        own_rows: &OwnRows,
    ) -> Evaluation {
        match policy.write_check() {
            Some(check) => {
                let scope = EvalScope::new(identity, post_image, lookup, own_rows);
                Self::run(policy, check, &scope)
            }
            None => Evaluation::allowed(true),
        }
    }

    fn run(policy: &Policy, predicate: &Predicate, scope: &EvalScope<'_>) -> Evaluation {
        let outcome = catch_unwind(AssertUnwindSafe(|| predicate.check(scope)))
            .unwrap_or_else(|panic| Err(PredicateError::new(panic_message(panic.as_ref()))));

        match outcome {
            Ok(allowed) => Evaluation::allowed(allowed),
            Err(e) => {
                let diagnostic = Diagnostic {
                    policy: policy.name().to_string(),
                    table: policy.table().to_string(),
                    row_id: scope.row().id().to_string(),
                    message: e.message().to_string(),
                };
                warn!(
                    policy = %diagnostic.policy,
                    table = %diagnostic.table,
                    row = %diagnostic.row_id,
                    error = %diagnostic.message,
                    "predicate failed; treating as false"
                );
                Evaluation::failed(diagnostic)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("predicate panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("predicate panicked: {}", msg)
    } else {
        "predicate panicked".to_string()
    }
}
