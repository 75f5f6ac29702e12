//! # Policies
//!
//! Named, operation-scoped predicates over the rows of a table, and the
//! registry that holds them.
//!
//! Policies for the same (table, operation) are permissive and OR-combined:
//! adding one can only widen access. A (table, operation) with no policies is
//! closed to everyone but the service role.

pub mod expr;
pub mod registry;
pub mod spec;
pub mod types;

pub use expr::Expr;
pub use registry::{PolicyRegistry, PolicyStore};
pub use spec::{parse_policy_specs, PolicySpec};
pub use types::{
    Dependencies, Operation, Policy, PolicyKey, Predicate, PredicateError, PredicateFn,
    WriteOperation,
};
