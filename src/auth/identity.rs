//! # Identity
//!
//! The verified caller of a single request.
//!
//! An `Identity` is produced by the resolver from a signed credential and is
//! immutable for the lifetime of one decision. It is never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Role claim value that marks a server-side, RLS-bypassing credential
pub const SERVICE_ROLE: &str = "service_role";

/// Caller roles, ordered from least to most privileged
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Verified,
    Moderator,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Verified, Role::Moderator, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Verified => "verified",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Parse a role claim. Returns `None` for anything unrecognised.
    pub fn from_claim(value: &str) -> Option<Role> {
        match value {
            "user" => Some(Role::User),
            "verified" => Some(Role::Verified),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Unknown or missing role claims fall back to `User`.
    pub fn from_claim_or_default(value: Option<&str>) -> Role {
        value.and_then(Role::from_claim).unwrap_or_default()
    }

    /// Whether this role is at or above `other` in the tier order
    pub fn at_least(&self, other: Role) -> bool {
        *self >= other
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified caller
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    subject_id: String,
    role: Role,
    claims: HashMap<String, Value>,
    service_role: bool,
}

impl Identity {
    /// Create an identity for an ordinary caller
    pub fn new(subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
            claims: HashMap::new(),
            service_role: false,
        }
    }

    /// Create a service-role identity (server-side administration)
    pub fn service(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            role: Role::Admin,
            claims: HashMap::new(),
            service_role: true,
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    pub(crate) fn with_claims(mut self, claims: HashMap<String, Value>) -> Self {
        self.claims.extend(claims);
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn claims(&self) -> &HashMap<String, Value> {
        &self.claims
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    pub fn is_service_role(&self) -> bool {
        self.service_role
    }
}
