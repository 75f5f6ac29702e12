//! Candidate rows handed to the engine by the storage layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AccessError, AccessResult};

/// Name under which a row's primary key is addressable from predicates
pub const ID_FIELD: &str = "id";

/// A row of some table. The engine reads rows; it never stores them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    table: String,
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl Row {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Build a row from a JSON object carrying a string `id` member
    pub fn from_object(table: impl Into<String>, object: Value) -> AccessResult<Self> {
        let Value::Object(mut fields) = object else {
            return Err(AccessError::InvalidRequest("row must be a JSON object".to_string()));
        };

        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(id)) => id,
            _ => {
                return Err(AccessError::InvalidRequest(
                    "row object needs a string \"id\"".to_string(),
                ))
            }
        };

        Ok(Self {
            table: table.into(),
            id,
            fields,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Field value; `id` resolves to the primary key when not stored as a field
    pub fn get(&self, field: &str) -> Option<Value> {
        match self.fields.get(field) {
            Some(value) => Some(value.clone()),
            None if field == ID_FIELD => Some(Value::String(self.id.clone())),
            None => None,
        }
    }

    /// Field interpreted as an identifier string
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(value) => value.as_str(),
            None if field == ID_FIELD => Some(&self.id),
            None => None,
        }
    }

    /// Whether a field equals `expected` (missing fields never match)
    pub fn field_equals(&self, field: &str, expected: &Value) -> bool {
        match self.fields.get(field) {
            Some(value) => value == expected,
            None if field == ID_FIELD => expected.as_str() == Some(self.id.as_str()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_is_addressable_as_field() {
        let row = Row::new("profiles", "alice").with_field("role", json!("admin"));

        assert_eq!(row.text("id"), Some("alice"));
        assert_eq!(row.get("id"), Some(json!("alice")));
        assert!(row.field_equals("id", &json!("alice")));
        assert!(row.field_equals("role", &json!("admin")));
        assert!(!row.field_equals("bio", &json!(null)));
    }

    #[test]
    fn test_from_object() {
        let row = Row::from_object(
            "profiles",
            json!({"id": "bob", "username": "bob", "role": "user"}),
        )
        .unwrap();

        assert_eq!(row.table(), "profiles");
        assert_eq!(row.id(), "bob");
        assert_eq!(row.text("username"), Some("bob"));
        assert!(!row.fields().contains_key("id"));
    }

    #[test]
    fn test_from_object_requires_string_id() {
        assert!(Row::from_object("profiles", json!({"id": 7})).is_err());
        assert!(Row::from_object("profiles", json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_non_string_field_is_not_text() {
        let row = Row::new("profiles", "alice").with_field("age", json!(30));
        assert_eq!(row.text("age"), None);
        assert_eq!(row.get("age"), Some(json!(30)));
    }
}
