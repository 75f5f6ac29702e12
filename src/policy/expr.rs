//! Declarative predicate expressions.
//!
//! Expressions are the data form of a policy predicate. They are what policy
//! configuration documents contain, and they know which relationship tables
//! and caller-owned rows they read, so the engine can snapshot exactly those
//! before evaluating.
//!
//! ```json
//! { "type": "any", "exprs": [
//!     { "type": "subject_equals_field", "field": "id" },
//!     { "type": "related", "relation": "friendships", "field": "id" }
//! ]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::types::{Dependencies, PredicateError};
use crate::auth::Role;
use crate::engine::EvalScope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    True,
    False,

    /// `auth.uid() = row.<field>`
    SubjectEqualsField { field: String },

    /// `row.<field> = <value>`; a missing field never matches
    FieldEquals { field: String, value: Value },

    /// Token role is one of `roles`
    RoleIn { roles: Vec<Role> },

    /// Token claim equals `value`
    ClaimEquals { claim: String, value: Value },

    /// An edge in `relation` links the caller and `row.<field>` (either direction)
    Related { relation: String, field: String },

    /// The row is itself an edge and the caller is one of its endpoints
    EdgeContainsSubject { a_field: String, b_field: String },

    /// The caller's own row in `table` has `<field> = <value>`
    OwnRowFieldEquals {
        table: String,
        field: String,
        value: Value,
    },

    All { exprs: Vec<Expr> },
    Any { exprs: Vec<Expr> },
    Not { expr: Box<Expr> },
}

impl Expr {
    pub fn subject_equals_field(field: impl Into<String>) -> Self {
        Expr::SubjectEqualsField { field: field.into() }
    }

    pub fn field_equals(field: impl Into<String>, value: Value) -> Self {
        Expr::FieldEquals {
            field: field.into(),
            value,
        }
    }

    pub fn role_in(roles: impl IntoIterator<Item = Role>) -> Self {
        Expr::RoleIn {
            roles: roles.into_iter().collect(),
        }
    }

    pub fn claim_equals(claim: impl Into<String>, value: Value) -> Self {
        Expr::ClaimEquals {
            claim: claim.into(),
            value,
        }
    }

    pub fn related(relation: impl Into<String>, field: impl Into<String>) -> Self {
        Expr::Related {
            relation: relation.into(),
            field: field.into(),
        }
    }

    pub fn edge_contains_subject(a_field: impl Into<String>, b_field: impl Into<String>) -> Self {
        Expr::EdgeContainsSubject {
            a_field: a_field.into(),
            b_field: b_field.into(),
        }
    }

    pub fn own_row_field_equals(
        table: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        Expr::OwnRowFieldEquals {
            table: table.into(),
            field: field.into(),
            value,
        }
    }

    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::All {
            exprs: exprs.into_iter().collect(),
        }
    }

    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Any {
            exprs: exprs.into_iter().collect(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not {
            expr: Box::new(expr),
        }
    }

    /// Relationship tables and own-row tables this expression reads
    pub fn dependencies(&self) -> Dependencies {
        let mut deps = Dependencies::default();
        self.collect_dependencies(&mut deps);
        deps
    }

    fn collect_dependencies(&self, deps: &mut Dependencies) {
        match self {
            Expr::Related { relation, .. } => {
                deps.relations.insert(relation.clone());
            }
            Expr::OwnRowFieldEquals { table, .. } => {
                deps.own_rows.insert(table.clone());
            }
            Expr::All { exprs } | Expr::Any { exprs } => {
                for expr in exprs {
                    expr.collect_dependencies(deps);
                }
            }
            Expr::Not { expr } => expr.collect_dependencies(deps),
            _ => {}
        }
    }

    /// Evaluate against one (identity, row) pair
    pub fn evaluate(&self, scope: &EvalScope<'_>) -> Result<bool, PredicateError> {
        match self {
            Expr::True => Ok(true),
            Expr::False => Ok(false),

            Expr::SubjectEqualsField { field } => {
                let value = required_text(scope, field)?;
                Ok(value == scope.subject_id())
            }

            Expr::FieldEquals { field, value } => Ok(scope.row().field_equals(field, value)),

            Expr::RoleIn { roles } => Ok(roles.contains(&scope.identity().role())),

            Expr::ClaimEquals { claim, value } => Ok(scope.identity().claim(claim) == Some(value)),

            Expr::Related { relation, field } => {
                let other = required_text(scope, field)?;
                scope.exists(relation, other)
            }

            Expr::EdgeContainsSubject { a_field, b_field } => {
                let a = required_text(scope, a_field)?;
                let b = required_text(scope, b_field)?;
                Ok(a == scope.subject_id() || b == scope.subject_id())
            }

            Expr::OwnRowFieldEquals {
                table,
                field,
                value,
            } => Ok(scope
                .read_own_row(table)?
                .map(|own| own.field_equals(field, value))
                .unwrap_or(false)),

            Expr::All { exprs } => {
                for expr in exprs {
                    if !expr.evaluate(scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }

            Expr::Any { exprs } => {
                // A later true branch wins over an earlier failing one.
                let mut failure = None;
                for expr in exprs {
                    match expr.evaluate(scope) {
                        Ok(true) => return Ok(true),
                        Ok(false) => {}
                        Err(e) => {
                            failure.get_or_insert(e);
                        }
                    }
                }
                match failure {
                    Some(e) => Err(e),
                    None => Ok(false),
                }
            }

            Expr::Not { expr } => expr.evaluate(scope).map(|b| !b),
        }
    }
}

fn required_text<'a>(scope: &'a EvalScope<'_>, field: &str) -> Result<&'a str, PredicateError> {
    scope.row().text(field).ok_or_else(|| {
        PredicateError::new(format!(
            "row {} of {} has no identifier field \"{}\"",
            scope.row().id(),
            scope.row().table(),
            field
        ))
    })
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::engine::OwnRows;
    use crate::relationship::{Edge, RelationshipIndex};
    use crate::row::Row;
    use serde_json::json;

    fn eval(expr: &Expr, identity: &Identity, row: &Row, index: &RelationshipIndex, own: &OwnRows) -> Result<bool, PredicateError> {
        expr.evaluate(&EvalScope::new(identity, row, index, own))
    }

    #[test]
    fn test_subject_equals_field() {
        let alice = Identity::new("alice", Role::User);
        let index = RelationshipIndex::new();
        let own = OwnRows::new("alice");
        let expr = Expr::subject_equals_field("id");

        assert!(eval(&expr, &alice, &Row::new("profiles", "alice"), &index, &own).unwrap());
        assert!(!eval(&expr, &alice, &Row::new("profiles", "bob"), &index, &own).unwrap());
    }

    #[test]
    fn test_missing_identifier_field_is_an_error() {
        let alice = Identity::new("alice", Role::User);
        let index = RelationshipIndex::new();
        let own = OwnRows::new("alice");
        let expr = Expr::subject_equals_field("owner_id");

        let result = eval(&expr, &alice, &Row::new("posts", "p1"), &index, &own);
        assert!(result.is_err());
    }

    #[test]
    fn test_related_is_symmetric() {
        let index = RelationshipIndex::from_edges(vec![Edge::new("friendships", "alice", "bob")]);
        let expr = Expr::related("friendships", "id");

        let alice = Identity::new("alice", Role::User);
        let bob = Identity::new("bob", Role::User);

        assert!(eval(&expr, &alice, &Row::new("profiles", "bob"), &index, &OwnRows::new("alice")).unwrap());
        assert!(eval(&expr, &bob, &Row::new("profiles", "alice"), &index, &OwnRows::new("bob")).unwrap());
    }

    #[test]
    fn test_edge_contains_subject() {
        let alice = Identity::new("alice", Role::User);
        let index = RelationshipIndex::new();
        let own = OwnRows::new("alice");
        let expr = Expr::edge_contains_subject("user_a_id", "user_b_id");

        let mine = Row::new("friendships", "f1")
            .with_field("user_a_id", json!("bob"))
            .with_field("user_b_id", json!("alice"));
        let theirs = Row::new("friendships", "f2")
            .with_field("user_a_id", json!("bob"))
            .with_field("user_b_id", json!("carol"));

        assert!(eval(&expr, &alice, &mine, &index, &own).unwrap());
        assert!(!eval(&expr, &alice, &theirs, &index, &own).unwrap());
    }

    #[test]
    fn test_own_row_field_equals_reads_only_callers_row() {
        let alice = Identity::new("alice", Role::User);
        let index = RelationshipIndex::new();
        let mut own = OwnRows::new("alice");
        own.insert("profiles", Some(Row::new("profiles", "alice").with_field("role", json!("admin"))));

        let expr = Expr::own_row_field_equals("profiles", "role", json!("admin"));
        assert!(eval(&expr, &alice, &Row::new("profiles", "bob"), &index, &own).unwrap());
    }

    #[test]
    fn test_own_row_not_loaded_is_an_error() {
        let alice = Identity::new("alice", Role::User);
        let index = RelationshipIndex::new();
        let own = OwnRows::new("alice");

        let expr = Expr::own_row_field_equals("profiles", "role", json!("admin"));
        assert!(eval(&expr, &alice, &Row::new("profiles", "bob"), &index, &own).is_err());
    }

    #[test]
    fn test_any_prefers_true_over_error() {
        let alice = Identity::new("alice", Role::User);
        let index = RelationshipIndex::new();
        let own = OwnRows::new("alice");

        let expr = Expr::any([Expr::subject_equals_field("missing"), Expr::True]);
        assert!(eval(&expr, &alice, &Row::new("t", "x"), &index, &own).unwrap());

        let expr = Expr::any([Expr::subject_equals_field("missing"), Expr::False]);
        assert!(eval(&expr, &alice, &Row::new("t", "x"), &index, &own).is_err());
    }

    #[test]
    fn test_all_and_not() {
        let alice = Identity::new("alice", Role::Verified);
        let index = RelationshipIndex::new();
        let own = OwnRows::new("alice");
        let row = Row::new("profiles", "bob").with_field("role", json!("verified"));

        let verified_sees_verified = Expr::all([
            Expr::role_in([Role::Verified, Role::Moderator, Role::Admin]),
            Expr::field_equals("role", json!("verified")),
        ]);
        assert!(eval(&verified_sees_verified, &alice, &row, &index, &own).unwrap());
        assert!(!eval(&Expr::not(verified_sees_verified), &alice, &row, &index, &own).unwrap());
    }

    #[test]
    fn test_claim_equals() {
        let alice = Identity::new("alice", Role::User).with_claim("tenant", json!("acme"));
        let index = RelationshipIndex::new();
        let own = OwnRows::new("alice");

        let expr = Expr::claim_equals("tenant", json!("acme"));
        assert!(eval(&expr, &alice, &Row::new("t", "x"), &index, &own).unwrap());
        let expr = Expr::claim_equals("tenant", json!("globex"));
        assert!(!eval(&expr, &alice, &Row::new("t", "x"), &index, &own).unwrap());
    }

    #[test]
    fn test_dependencies_are_collected_through_combinators() {
        let expr = Expr::any([
            Expr::subject_equals_field("id"),
            Expr::related("friendships", "id"),
            Expr::not(Expr::own_row_field_equals("profiles", "role", json!("banned"))),
        ]);

        let deps = expr.dependencies();
        assert_eq!(deps.relations.iter().collect::<Vec<_>>(), vec!["friendships"]);
        assert_eq!(deps.own_rows.iter().collect::<Vec<_>>(), vec!["profiles"]);
    }

    #[test]
    fn test_json_form() {
        let expr: Expr = serde_json::from_value(json!({
            "type": "any",
            "exprs": [
                { "type": "subject_equals_field", "field": "id" },
                { "type": "related", "relation": "friendships", "field": "id" },
                { "type": "role_in", "roles": ["admin"] },
                { "type": "true" }
            ]
        }))
        .unwrap();

        assert_eq!(
            expr,
            Expr::any([
                Expr::subject_equals_field("id"),
                Expr::related("friendships", "id"),
                Expr::role_in([Role::Admin]),
                Expr::True,
            ])
        );
    }
}
