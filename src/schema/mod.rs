//! Schema descriptors: the per-entity field map the query compiler uses as an
//! allow-list and the store uses to validate writes.

pub mod relation;

use serde_json::Value;
use std::collections::BTreeMap;

pub use relation::{Cardinality, RelationDescriptor};

use crate::filter::Predicate;

/// Fields every entity carries in addition to its own schema
pub const ID: &str = "id";
pub const IS_DELETED: &str = "isDeleted";
pub const CREATED_BY: &str = "createdBy";
pub const UPDATED_BY: &str = "updatedBy";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Fields never included in keyword search
pub const SEARCH_EXCLUDED: &[&str] = &[ID, CREATED_BY, UPDATED_BY];

/// Fields `update` never overwrites from caller input
pub const IMMUTABLE_FIELDS: &[&str] = &[ID, CREATED_BY, CREATED_AT];

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Text,
    Boolean,
    Numeric,
    Date,
    Reference,
    Json,
}

impl FieldKind {
    /// Whether keyword search covers this kind
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Text)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub max_length: Option<usize>,
    /// Referenced table for `Reference` fields
    pub references: Option<&'static str>,
    pub default: Option<Value>,
}

impl FieldDef {
    fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            max_length: None,
            references: None,
            default: None,
        }
    }

    pub fn string(name: &'static str, max_length: usize) -> Self {
        Self { max_length: Some(max_length), ..Self::new(name, FieldKind::String) }
    }

    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn numeric(name: &'static str) -> Self {
        Self::new(name, FieldKind::Numeric)
    }

    pub fn date(name: &'static str) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn json(name: &'static str) -> Self {
        Self::new(name, FieldKind::Json)
    }

    /// Foreign key to `table.id`, stored as a 36 character identifier
    pub fn reference(name: &'static str, table: &'static str) -> Self {
        Self {
            max_length: Some(36),
            references: Some(table),
            ..Self::new(name, FieldKind::Reference)
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Substring match for name-like or long strings, exact match otherwise
    pub fn prefers_substring_match(&self) -> bool {
        match self.kind {
            FieldKind::Text => true,
            FieldKind::String => {
                self.name.to_lowercase().contains("name")
                    || self.max_length.map(|len| len > 36).unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Field map for one entity type, base fields included
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    fields: Vec<FieldDef>,
}

impl SchemaDescriptor {
    /// Build a schema from entity fields, appending the base fields every entity carries
    pub fn new(fields: Vec<FieldDef>) -> Self {
        let mut all = vec![FieldDef::string(ID, 36).required()];
        all.extend(fields);
        all.push(FieldDef::boolean(IS_DELETED).required().default_value(false));
        all.push(FieldDef::string(CREATED_BY, 255).required());
        all.push(FieldDef::string(UPDATED_BY, 255).required());
        all.push(FieldDef::date(CREATED_AT));
        all.push(FieldDef::date(UPDATED_AT));
        Self { fields: all }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    /// Textual fields eligible for keyword search
    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.kind.is_textual() && !SEARCH_EXCLUDED.contains(&f.name))
    }
}

/// Everything the store and compiler need to know about one entity type
#[derive(Debug)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub schema: SchemaDescriptor,
    pub relations: Vec<RelationDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: &'static str, table: &'static str, schema: SchemaDescriptor) -> Self {
        Self { name, table, schema, relations: Vec::new() }
    }

    pub fn with_relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn relation(&self, alias: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.alias == alias)
    }
}

/// Per-field validation messages collected before a write
pub type FieldErrors = BTreeMap<String, String>;

/// Validate a record's values against the schema.
///
/// `creating` additionally requires every non-nullable field without a default.
pub fn validate(
    schema: &SchemaDescriptor,
    fields: &serde_json::Map<String, Value>,
    creating: bool,
) -> FieldErrors {
    let mut errors = FieldErrors::new();

    for def in schema.fields() {
        let value = fields.get(def.name);

        let missing = matches!(value, None | Some(Value::Null));
        if missing {
            if !def.nullable && (creating || value.is_some()) && def.default.is_none() {
                errors.insert(def.name.to_string(), format!("{} cannot be null", def.name));
            }
            continue;
        }
        let Some(value) = value else { continue };

        let shape_ok = match def.kind {
            FieldKind::String | FieldKind::Text | FieldKind::Reference => value.is_string(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Numeric => {
                value.is_number() || value.as_str().map(|s| s.trim().parse::<f64>().is_ok()).unwrap_or(false)
            }
            FieldKind::Date => value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok() || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                .unwrap_or(false),
            FieldKind::Json => true,
        };
        if !shape_ok {
            errors.insert(def.name.to_string(), format!("{} has an invalid {:?} value", def.name, def.kind));
            continue;
        }

        if let (Some(max), Some(s)) = (def.max_length, value.as_str()) {
            if s.chars().count() > max {
                errors.insert(
                    def.name.to_string(),
                    format!("{} must be at most {} characters", def.name, max),
                );
            }
        }
    }

    errors
}

/// Predicate that hides soft-deleted rows
pub fn not_deleted() -> Predicate {
    Predicate::not_true(IS_DELETED)
}
