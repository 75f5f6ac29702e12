//! rowguard - row-level authorization for multi-tenant data
//!
//! Verifies a caller's signed access token into an [`Identity`], then decides
//! which rows of a table that identity may read and which writes it may make,
//! using permissive per-table policies. Every failure path denies.
//!
//! ```ignore
//! let identity = resolver.resolve(&bearer_token)?;
//! let visible = engine
//!     .filter_for_read(&identity, "profiles", candidates, &cancel)
//!     .await
//!     .rows;
//! ```

pub mod auth;
pub mod config;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod policy;
pub mod relationship;
pub mod row;
pub mod source;

pub use auth::{Identity, IdentityResolver, Role, TokenIssuer};
pub use config::RowguardConfig;
pub use engine::{DecisionEngine, Diagnostic, EngineConfig, Permit, ReadOutcome};
pub use errors::{AccessError, AccessResult};
pub use policy::{Expr, Operation, Policy, PolicyRegistry, PolicyStore, Predicate, WriteOperation};
pub use relationship::{Edge, MemoryRelationshipSource, RelationshipSource};
pub use row::Row;
pub use source::{MemoryRowSource, RowSource};
