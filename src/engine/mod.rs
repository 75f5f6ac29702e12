//! # Decision Engine
//!
//! Turns an identity, a table and candidate rows into the rows the caller may
//! see, and an identity plus row images into a write permit or a denial.

pub mod config;
pub mod decision;
pub mod evaluator;
pub mod events;
pub mod scope;

pub use config::EngineConfig;
pub use decision::{DecisionEngine, Permit, ReadOutcome};
pub use evaluator::{Diagnostic, Evaluation, PredicateEvaluator};
pub use events::DecisionEvent;
pub use scope::{DecisionSnapshot, EvalScope, OwnRows};
