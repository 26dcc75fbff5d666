use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::RelationDescriptor;

/// Column addressed by a predicate or an order clause
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRef {
    Column(String),
    /// `alias.field` on a declared relation
    Related { alias: String, field: String },
}

impl FieldRef {
    pub fn column(name: impl Into<String>) -> Self {
        FieldRef::Column(name.into())
    }

    pub fn related(alias: impl Into<String>, field: impl Into<String>) -> Self {
        FieldRef::Related { alias: alias.into(), field: field.into() }
    }

    /// The dotted path form (`field` or `alias.field`)
    pub fn path(&self) -> String {
        match self {
            FieldRef::Column(name) => name.clone(),
            FieldRef::Related { alias, field } => format!("{}.{}", alias, field),
        }
    }
}

/// Predicate tree. Values are always bound as parameters, never spliced.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(FieldRef, Value),
    /// Matches rows whose value is not `true`, nulls included
    NotTrue(FieldRef),
    /// Case-insensitive substring match
    Contains(FieldRef, String),
    /// Value, compared as text, is one of the given keys
    In(FieldRef, Vec<String>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(FieldRef::column(field), value.into())
    }

    pub fn not_true(field: impl Into<String>) -> Self {
        Predicate::NotTrue(FieldRef::column(field))
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Predicate::Contains(FieldRef::column(field), needle.into())
    }

    pub fn one_of(field: impl Into<String>, keys: Vec<String>) -> Self {
        Predicate::In(FieldRef::column(field), keys)
    }

    /// AND-combine, flattening the trivial cases
    pub fn all(mut predicates: Vec<Predicate>) -> Self {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Predicate::And(predicates)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Predicate::And(items) | Predicate::Or(items) => items.iter().all(Predicate::is_empty),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Case-sensitive direction token, `None` when unrecognized
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "asc" | "ascending" | "ascend" | "1" => Some(SortDirection::Asc),
            "desc" | "descending" | "descend" | "-1" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub field: FieldRef,
    pub sort: SortDirection,
}

/// Resolved pagination for one list request
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    pub page_index: i64,
    pub page_size: i64,
    pub limit: i64,
    pub offset: i64,
    pub order: Vec<FilterOrderInfo>,
}

/// Structured, validated list query. Built fresh per request.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    /// AND-combined conditions
    pub conditions: Vec<Predicate>,
    /// OR-combined keyword conditions, applied as one AND-ed group
    pub or_conditions: Vec<Predicate>,
    pub order: Vec<FilterOrderInfo>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub group_by: Vec<String>,
    pub distinct: bool,
    /// Relations to eager-load; empty means none
    pub include: Vec<RelationDescriptor>,
    /// Columns to return; `None` returns every column
    pub attributes: Option<Vec<String>>,
}

impl QueryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, predicate: Predicate) -> Self {
        self.conditions.push(predicate);
        self
    }

    pub fn with_conditions(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.conditions.extend(predicates);
        self
    }

    pub fn with_order(mut self, field: FieldRef, sort: SortDirection) -> Self {
        self.order.push(FilterOrderInfo { field, sort });
        self
    }

    pub fn with_limit(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn with_include(mut self, include: Vec<RelationDescriptor>) -> Self {
        self.include = include;
        self
    }

    pub fn with_attributes(mut self, attributes: Option<Vec<String>>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<String>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Apply pagination's limit, offset and order
    pub fn paginate(mut self, pagination: &Pagination) -> Self {
        self.limit = Some(pagination.limit);
        self.offset = Some(pagination.offset);
        self.order = pagination.order.clone();
        self
    }

    /// The full WHERE tree: every condition AND-ed with the OR group
    pub fn predicate(&self) -> Predicate {
        let mut all = self.conditions.clone();
        if !self.or_conditions.is_empty() {
            all.push(Predicate::Or(self.or_conditions.clone()));
        }
        Predicate::And(all)
    }
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}
