use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::backend::{Row, StorageBackend};
use super::manager::DatabaseError;
use crate::filter::{FieldRef, FilterError, FilterOrderInfo, Predicate, QueryPlan, SortDirection};
use crate::schema::{EntityDescriptor, FieldKind, RelationDescriptor, ID};

type Tables = HashMap<String, Vec<Row>>;

/// In-process storage with the same matching rules as the SQL backend:
/// case-insensitive substring search, non-string exact matches compared as
/// text, foreign keys enforced on insert and update.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

/// Snapshot the transaction reads and writes against, plus the row-level
/// effects that commit replays onto the live tables.
pub struct MemoryTx {
    tables: Tables,
    effects: Vec<Effect>,
}

enum Effect {
    /// Insert or replace the row with this id
    Put { table: String, row: Row },
    Remove { table: String, ids: Vec<String> },
}

impl Effect {
    fn apply(self, tables: &mut Tables) {
        match self {
            Effect::Put { table, row } => {
                let rows = tables.entry(table).or_default();
                let id = row.get(ID).and_then(text_of);
                match rows.iter_mut().find(|r| id.is_some() && r.get(ID).and_then(text_of) == id) {
                    Some(existing) => *existing = row,
                    None => rows.push(row),
                }
            }
            Effect::Remove { table, ids } => {
                if let Some(rows) = tables.get_mut(&table) {
                    rows.retain(|r| r.get(ID).and_then(text_of).map(|id| !ids.contains(&id)).unwrap_or(true));
                }
            }
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently stored for a table, soft-deleted ones included
    pub async fn dump(&self, table: &str) -> Vec<Row> {
        self.tables.read().await.get(table).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, DatabaseError> {
        Ok(MemoryTx { tables: self.tables.read().await.clone(), effects: Vec::new() })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), DatabaseError> {
        let mut live = self.tables.write().await;
        for effect in tx.effects {
            effect.apply(&mut live);
        }
        Ok(())
    }

    async fn rollback(&self, _tx: Self::Tx) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn find_all(
        &self,
        entity: &EntityDescriptor,
        plan: &QueryPlan,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Vec<Row>, DatabaseError> {
        let rows = match tx {
            Some(tx) => select(&tx.tables, entity, plan)?,
            None => select(&*self.tables.read().await, entity, plan)?,
        };
        let offset = plan.offset.unwrap_or(0).max(0) as usize;
        let limit = plan.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(
        &self,
        entity: &EntityDescriptor,
        plan: &QueryPlan,
        tx: Option<&mut Self::Tx>,
    ) -> Result<i64, DatabaseError> {
        let rows = match tx {
            Some(tx) => select(&tx.tables, entity, plan)?,
            None => select(&*self.tables.read().await, entity, plan)?,
        };
        Ok(rows.len() as i64)
    }

    async fn insert(
        &self,
        entity: &EntityDescriptor,
        row: &Row,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Row, DatabaseError> {
        match tx {
            Some(tx) => {
                let stored = insert(&mut tx.tables, entity, row)?;
                tx.effects.push(Effect::Put { table: entity.table.to_string(), row: stored.clone() });
                Ok(stored)
            }
            None => insert(&mut *self.tables.write().await, entity, row),
        }
    }

    async fn update(
        &self,
        entity: &EntityDescriptor,
        id: &str,
        changes: &Row,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Option<Row>, DatabaseError> {
        match tx {
            Some(tx) => {
                let updated = update(&mut tx.tables, entity, id, changes)?;
                if let Some(row) = &updated {
                    tx.effects.push(Effect::Put { table: entity.table.to_string(), row: row.clone() });
                }
                Ok(updated)
            }
            None => update(&mut *self.tables.write().await, entity, id, changes),
        }
    }

    async fn delete_where(
        &self,
        entity: &EntityDescriptor,
        predicate: &Predicate,
        tx: Option<&mut Self::Tx>,
    ) -> Result<u64, DatabaseError> {
        let removed = match tx {
            Some(tx) => {
                let removed = delete_where(&mut tx.tables, entity, predicate)?;
                let ids = removed.iter().filter_map(|r| r.get(ID).and_then(text_of)).collect();
                tx.effects.push(Effect::Remove { table: entity.table.to_string(), ids });
                removed
            }
            None => delete_where(&mut *self.tables.write().await, entity, predicate)?,
        };
        Ok(removed.len() as u64)
    }
}

/// Filter, order, project and de-duplicate; paging is left to the caller
fn select(tables: &Tables, entity: &EntityDescriptor, plan: &QueryPlan) -> Result<Vec<Row>, DatabaseError> {
    let predicate = plan.predicate();
    let empty = Vec::new();
    let source = tables.get(entity.table).unwrap_or(&empty);

    let mut matched = Vec::new();
    for row in source {
        if !eval(tables, entity, row, &predicate)? {
            continue;
        }
        let mut keep = true;
        for relation in plan.include.iter().filter(|r| r.required) {
            if related_rows(tables, relation, row)?.is_empty() {
                keep = false;
                break;
            }
        }
        if keep {
            matched.push(row);
        }
    }

    let mut keyed = Vec::with_capacity(matched.len());
    for row in matched {
        keyed.push((sort_keys(tables, entity, row, &plan.order)?, row));
    }
    keyed.sort_by(|(a, _), (b, _)| {
        a.iter()
            .zip(b.iter())
            .zip(plan.order.iter())
            .map(|((x, y), info)| directed(compare_nullable(x.as_ref(), y.as_ref()), info.sort))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    let mut rows: Vec<Row> = Vec::with_capacity(keyed.len());
    for (_, row) in keyed {
        let projected = match &plan.attributes {
            Some(attrs) if !attrs.is_empty() => {
                let mut out = Row::new();
                for attr in attrs {
                    ensure_column(entity, attr)?;
                    out.insert(attr.clone(), row.get(attr).cloned().unwrap_or(Value::Null));
                }
                out
            }
            _ => row.clone(),
        };
        rows.push(projected);
    }

    if !plan.group_by.is_empty() {
        for g in &plan.group_by {
            ensure_column(entity, g)?;
        }
        let mut seen: Vec<Vec<Value>> = Vec::new();
        rows.retain(|row| {
            let key: Vec<Value> = plan.group_by.iter().map(|g| row.get(g).cloned().unwrap_or(Value::Null)).collect();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });
    } else if plan.distinct {
        let mut seen: Vec<Row> = Vec::new();
        rows.retain(|row| {
            if seen.contains(row) {
                false
            } else {
                seen.push(row.clone());
                true
            }
        });
    }
    Ok(rows)
}

fn insert(tables: &mut Tables, entity: &EntityDescriptor, row: &Row) -> Result<Row, DatabaseError> {
    let stored: Row = row.iter().filter(|(k, _)| entity.schema.contains(k)).map(|(k, v)| (k.clone(), v.clone())).collect();
    check_references(tables, entity, &stored)?;

    let id = stored.get(ID).and_then(text_of);
    let table = tables.entry(entity.table.to_string()).or_default();
    if let Some(id) = &id {
        if table.iter().any(|r| r.get(ID).and_then(text_of).as_deref() == Some(id.as_str())) {
            let mut errors = crate::schema::FieldErrors::new();
            errors.insert(ID.to_string(), format!("{} must be unique", ID));
            return Err(DatabaseError::validation(errors));
        }
    }
    table.push(stored.clone());
    Ok(stored)
}

fn update(tables: &mut Tables, entity: &EntityDescriptor, id: &str, changes: &Row) -> Result<Option<Row>, DatabaseError> {
    let changes: Row = changes.iter().filter(|(k, _)| entity.schema.contains(k)).map(|(k, v)| (k.clone(), v.clone())).collect();
    check_references(tables, entity, &changes)?;

    let Some(table) = tables.get_mut(entity.table) else {
        return Ok(None);
    };
    let Some(row) = table.iter_mut().find(|r| r.get(ID).and_then(text_of).as_deref() == Some(id)) else {
        return Ok(None);
    };
    for (k, v) in changes {
        row.insert(k, v);
    }
    Ok(Some(row.clone()))
}

/// Remove matching rows, returning them
fn delete_where(tables: &mut Tables, entity: &EntityDescriptor, predicate: &Predicate) -> Result<Vec<Row>, DatabaseError> {
    let rows = tables.get(entity.table).cloned().unwrap_or_default();
    let mut kept = Vec::with_capacity(rows.len());
    let mut removed = Vec::new();
    for row in rows {
        if eval(tables, entity, &row, predicate)? {
            removed.push(row);
        } else {
            kept.push(row);
        }
    }
    if !removed.is_empty() {
        tables.insert(entity.table.to_string(), kept);
    }
    Ok(removed)
}

/// Every non-null reference must name an existing row
fn check_references(tables: &Tables, entity: &EntityDescriptor, row: &Row) -> Result<(), DatabaseError> {
    let mut missing = Vec::new();
    for def in entity.schema.fields().filter(|f| f.kind == FieldKind::Reference) {
        let (Some(target), Some(key)) = (def.references, row.get(def.name).and_then(text_of)) else {
            continue;
        };
        let exists = tables
            .get(target)
            .map(|rows| rows.iter().any(|r| r.get(ID).and_then(text_of).as_deref() == Some(key.as_str())))
            .unwrap_or(false);
        if !exists {
            missing.push(def.name.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DatabaseError::ForeignKey { fields: missing })
    }
}

fn ensure_column(entity: &EntityDescriptor, name: &str) -> Result<(), DatabaseError> {
    if entity.schema.contains(name) {
        Ok(())
    } else {
        Err(FilterError::InvalidColumn(format!("{}.{}", entity.name, name)).into())
    }
}

/// Rows of the relation's target joined to `row`, extra filter applied
fn related_rows<'t>(
    tables: &'t Tables,
    relation: &RelationDescriptor,
    row: &Row,
) -> Result<Vec<&'t Row>, DatabaseError> {
    let target = relation.target();
    let Some(local) = row.get(relation.local_key).and_then(text_of) else {
        return Ok(vec![]);
    };
    let mut out = Vec::new();
    for candidate in tables.get(target.table).map(|v| v.as_slice()).unwrap_or(&[]) {
        if candidate.get(relation.foreign_key).and_then(text_of).as_deref() != Some(local.as_str()) {
            continue;
        }
        if let Some(extra) = &relation.extra_filter {
            if !eval(tables, target, candidate, extra)? {
                continue;
            }
        }
        out.push(candidate);
    }
    Ok(out)
}

fn eval(tables: &Tables, entity: &EntityDescriptor, row: &Row, predicate: &Predicate) -> Result<bool, DatabaseError> {
    match predicate {
        Predicate::And(items) => {
            for item in items.iter().filter(|p| !p.is_empty()) {
                if !eval(tables, entity, row, item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Or(items) => {
            for item in items.iter().filter(|p| !p.is_empty()) {
                if eval(tables, entity, row, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Eq(field, expected) => any_value(tables, entity, row, field, |v| matches_exact(v, expected)),
        Predicate::NotTrue(field) => any_value(tables, entity, row, field, |v| v != Some(&Value::Bool(true))),
        Predicate::Contains(field, needle) => {
            let needle = needle.to_lowercase();
            any_value(tables, entity, row, field, |v| {
                v.and_then(text_of).map(|s| s.to_lowercase().contains(&needle)).unwrap_or(false)
            })
        }
        Predicate::In(field, keys) => any_value(tables, entity, row, field, |v| {
            v.and_then(text_of).map(|s| keys.contains(&s)).unwrap_or(false)
        }),
    }
}

/// Test a primary column, or any joined row's column for a related field
fn any_value<F>(tables: &Tables, entity: &EntityDescriptor, row: &Row, field: &FieldRef, test: F) -> Result<bool, DatabaseError>
where
    F: Fn(Option<&Value>) -> bool,
{
    match field {
        FieldRef::Column(name) => {
            ensure_column(entity, name)?;
            Ok(test(row.get(name).filter(|v| !v.is_null())))
        }
        FieldRef::Related { alias, field } => {
            let relation = entity.relation(alias).ok_or_else(|| FilterError::UnknownRelation(alias.clone()))?;
            ensure_column(relation.target(), field)?;
            Ok(related_rows(tables, relation, row)?
                .into_iter()
                .any(|r| test(r.get(field).filter(|v| !v.is_null()))))
        }
    }
}

fn matches_exact(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) => true,
        (None, _) | (Some(_), Value::Null) => false,
        (Some(Value::Bool(a)), Value::Bool(b)) => a == b,
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), Value::String(b)) => text_of(a).as_deref() == Some(b.as_str()),
        (Some(a), b) => a == b,
    }
}

fn sort_keys(
    tables: &Tables,
    entity: &EntityDescriptor,
    row: &Row,
    order: &[FilterOrderInfo],
) -> Result<Vec<Option<Value>>, DatabaseError> {
    let mut keys = Vec::with_capacity(order.len());
    for info in order {
        let key = match &info.field {
            FieldRef::Column(name) => {
                ensure_column(entity, name)?;
                row.get(name).filter(|v| !v.is_null()).cloned()
            }
            FieldRef::Related { alias, field } => {
                let relation = entity.relation(alias).ok_or_else(|| FilterError::UnknownRelation(alias.clone()))?;
                ensure_column(relation.target(), field)?;
                // first joined value in the requested direction
                related_rows(tables, relation, row)?
                    .into_iter()
                    .filter_map(|r| r.get(field).filter(|v| !v.is_null()).cloned())
                    .min_by(|a, b| directed(compare_values(a, b), info.sort))
            }
        };
        keys.push(key);
    }
    Ok(keys)
}

fn directed(ordering: Ordering, sort: SortDirection) -> Ordering {
    match sort {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Nulls sort as the largest value, as PostgreSQL does
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => text_of(a).cmp(&text_of(b)),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
