use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::schema::{self, SchemaDescriptor, IMMUTABLE_FIELDS};

/// Fields only the store may set; caller input for them is dropped
const SYSTEM_FIELDS: &[&str] = &[
    schema::ID,
    schema::IS_DELETED,
    schema::CREATED_BY,
    schema::UPDATED_BY,
    schema::CREATED_AT,
    schema::UPDATED_AT,
];

/// Errors that can occur while building a record from input
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
}

/// A dynamic entity row with change tracking
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// State as loaded from storage (None for creates)
    original: Option<Map<String, Value>>,
    fields: Map<String, Value>,
    modified_fields: BTreeSet<String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record from caller input, keeping only schema fields the caller may set
    pub fn from_input(json: Value, schema: &SchemaDescriptor) -> Result<Self, RecordError> {
        let Value::Object(map) = json else {
            return Err(RecordError::InvalidJson("Expected JSON object".to_string()));
        };
        let mut record = Self::new();
        for (key, value) in map {
            if SYSTEM_FIELDS.contains(&key.as_str()) {
                tracing::debug!("Dropping system field '{}' from input", key);
                continue;
            }
            if !schema.contains(&key) {
                tracing::debug!("Dropping unknown field '{}' from input", key);
                continue;
            }
            record.fields.insert(key, value);
        }
        Ok(record)
    }

    /// Record from a stored row (system fields allowed)
    pub fn from_row(row: Map<String, Value>) -> Self {
        Self { original: Some(row.clone()), fields: row, modified_fields: BTreeSet::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    /// Set a caller-writable field; immutable fields are ignored once stored
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if !self.is_new() && IMMUTABLE_FIELDS.contains(&key.as_str()) {
            tracing::warn!("Attempted to overwrite immutable field '{}' - ignoring", key);
            return self;
        }
        self.set_system_field(key, value)
    }

    /// Set any field, system fields included
    pub fn set_system_field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        let changed = self.original.as_ref().map(|o| o.get(&key) != Some(&value)).unwrap_or(true);
        if changed {
            self.modified_fields.insert(key.clone());
        }
        self.fields.insert(key, value);
        self
    }

    /// Apply every field of another record on top of this one
    pub fn merge(&mut self, changes: Record) -> &mut Self {
        for (key, value) in changes.fields {
            self.set(key, value);
        }
        self
    }

    /// Fill absent fields from schema defaults
    pub fn apply_defaults(&mut self, schema: &SchemaDescriptor) -> &mut Self {
        for def in schema.fields() {
            if let Some(default) = &def.default {
                if matches!(self.fields.get(def.name), None | Some(Value::Null)) {
                    self.set_system_field(def.name, default.clone());
                }
            }
        }
        self
    }

    pub fn is_modified(&self, key: &str) -> bool {
        self.modified_fields.contains(key)
    }

    /// Modified fields and their new values
    pub fn changes(&self) -> Map<String, Value> {
        self.modified_fields
            .iter()
            .filter_map(|k| self.fields.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::employee;
    use serde_json::json;

    #[test]
    fn input_drops_system_and_unknown_fields() {
        let record = Record::from_input(
            json!({ "id": "forged", "createdBy": "x", "employeeCode": "E1", "password": "p" }),
            &employee::descriptor().schema,
        )
        .unwrap();
        assert_eq!(record.fields().len(), 1);
        assert_eq!(record.get("employeeCode"), Some(&json!("E1")));
    }

    #[test]
    fn rejects_non_objects() {
        assert!(Record::from_input(json!([1, 2]), &employee::descriptor().schema).is_err());
    }

    #[test]
    fn stored_records_track_changes_and_keep_immutables() {
        let row = json!({ "id": "1", "employeeCode": "E1", "createdBy": "a" });
        let Value::Object(row) = row else { unreachable!() };
        let mut record = Record::from_row(row);
        record.set("employeeCode", "E1");
        record.set("employeeName", "Lim");
        record.set("createdBy", "b");
        assert!(!record.is_modified("employeeCode"));
        assert!(record.is_modified("employeeName"));
        assert_eq!(record.get("createdBy"), Some(&json!("a")));
        assert_eq!(record.changes().len(), 1);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let mut record = Record::new();
        record.apply_defaults(&employee::descriptor().schema);
        assert_eq!(record.get("isDeleted"), Some(&json!(false)));
    }
}
