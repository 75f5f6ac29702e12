//! Policy definitions as they appear in configuration documents.

use serde::{Deserialize, Serialize};

use super::expr::Expr;
use super::types::{Operation, Policy};
use crate::errors::{AccessError, AccessResult};

/// `(table, operation, name, predicate-description, optional write-check-description)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub table: String,
    pub operation: Operation,

    /// Who may act on a row. Optional only for inserts, where `with_check` decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<Expr>,

    /// What the post-image of an insert/update must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_check: Option<Expr>,
}

impl PolicySpec {
    pub fn into_policy(self) -> AccessResult<Policy> {
        let predicate = match (self.operation, self.using) {
            (_, Some(using)) => using,
            (Operation::Insert, None) if self.with_check.is_some() => Expr::True,
            (operation, None) => {
                return Err(AccessError::InvalidConfig(format!(
                    "policy \"{}\" on {} needs a `using` expression for {}",
                    self.name, self.table, operation
                )))
            }
        };

        let mut policy = Policy::new(self.name, self.table, self.operation, predicate);
        if let Some(check) = self.with_check {
            policy = policy.with_write_check(check);
        }
        Ok(policy)
    }
}

/// Parse a JSON array of policy definitions
pub fn parse_policy_specs(json: &str) -> AccessResult<Vec<PolicySpec>> {
    serde_json::from_str(json)
        .map_err(|e| AccessError::InvalidConfig(format!("policy document: {}", e)))
}
