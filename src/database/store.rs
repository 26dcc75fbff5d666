use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::backend::{Row, StorageBackend};
use super::manager::DatabaseError;
use super::record::Record;
use crate::filter::{FieldRef, Predicate, QueryPlan, SortDirection};
use crate::schema::{
    self, not_deleted, Cardinality, EntityDescriptor, RelationDescriptor, CREATED_AT, CREATED_BY, ID, IS_DELETED,
    UPDATED_AT, UPDATED_BY,
};

/// Whether update and soft delete may target a row that is already soft-deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftDeletePolicy {
    #[default]
    Reject,
    Allow,
}

/// Entity-specific behavior plugged into the generic store
pub trait EntityHooks: Send + Sync {
    /// Runs after stamping and before validation on every create and update
    fn before_write(&self, _record: &mut Record, _creating: bool) -> Result<(), DatabaseError> {
        Ok(())
    }
}

pub struct NoHooks;

impl EntityHooks for NoHooks {}

/// Paged list result
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub total_count: i64,
    pub rows: Vec<Row>,
}

/// CRUD over one entity type with soft-delete-aware reads.
///
/// Every operation takes an optional caller-owned transaction and never
/// begins or commits one itself.
pub struct EntityStore<B: StorageBackend> {
    backend: Arc<B>,
    entity: &'static EntityDescriptor,
    policy: SoftDeletePolicy,
    hooks: Arc<dyn EntityHooks>,
}

impl<B: StorageBackend> Clone for EntityStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            entity: self.entity,
            policy: self.policy,
            hooks: self.hooks.clone(),
        }
    }
}

impl<B: StorageBackend> EntityStore<B> {
    pub fn new(backend: Arc<B>, entity: &'static EntityDescriptor) -> Self {
        Self { backend, entity, policy: SoftDeletePolicy::default(), hooks: Arc::new(NoHooks) }
    }

    pub fn with_policy(mut self, policy: SoftDeletePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.entity
    }

    pub async fn get_by_id(
        &self,
        id: &str,
        attributes: Option<Vec<String>>,
        include_related: bool,
        tx: Option<&mut B::Tx>,
    ) -> Result<Option<Row>, DatabaseError> {
        self.get_one(vec![Predicate::eq(ID, id)], attributes, include_related, tx).await
    }

    /// Most recently created visible row matching every condition
    pub async fn get_one(
        &self,
        conditions: Vec<Predicate>,
        attributes: Option<Vec<String>>,
        include_related: bool,
        tx: Option<&mut B::Tx>,
    ) -> Result<Option<Row>, DatabaseError> {
        let include = if include_related { self.entity.relations.clone() } else { vec![] };
        let plan = QueryPlan::new()
            .with_conditions(conditions)
            .with_condition(not_deleted())
            .with_order(FieldRef::column(CREATED_AT), SortDirection::Desc)
            .with_limit(1, 0)
            .with_attributes(attributes)
            .with_include(include);
        Ok(self.fetch(&plan, tx).await?.into_iter().next())
    }

    /// Visible rows for the plan plus the total ignoring paging
    pub async fn get_all(&self, plan: QueryPlan, mut tx: Option<&mut B::Tx>) -> Result<ListResult, DatabaseError> {
        let plan = plan.with_condition(not_deleted());
        let total_count = self.backend.count(self.entity, &plan, tx.as_deref_mut()).await?;
        let rows = if total_count == 0 { vec![] } else { self.fetch(&plan, tx).await? };
        debug!("{}: {} of {} rows", self.entity.name, rows.len(), total_count);
        Ok(ListResult { total_count, rows })
    }

    /// Insert a new row stamped with `actor`; relations attached when requested
    pub async fn create(
        &self,
        mut record: Record,
        actor: Option<&str>,
        include_related: bool,
        mut tx: Option<&mut B::Tx>,
    ) -> Result<Row, DatabaseError> {
        let now = Value::String(Utc::now().to_rfc3339());
        if record.get(ID).map(Value::is_null).unwrap_or(true) {
            record.set_system_field(ID, Uuid::new_v4().to_string());
        }
        record.apply_defaults(&self.entity.schema);
        if let Some(actor) = actor {
            record.set_system_field(CREATED_BY, actor);
            record.set_system_field(UPDATED_BY, actor);
        }
        record.set_system_field(CREATED_AT, now.clone());
        record.set_system_field(UPDATED_AT, now);

        self.hooks.before_write(&mut record, true)?;
        self.check(&record, true)?;

        let row = self.backend.insert(self.entity, record.fields(), tx.as_deref_mut()).await?;
        if include_related && !self.entity.relations.is_empty() {
            let mut rows = vec![row];
            self.attach(&mut rows, &self.entity.relations, tx).await?;
            return rows.pop().ok_or_else(|| DatabaseError::NotFound(self.entity.name.to_string()));
        }
        Ok(row)
    }

    /// Overwrite the matching row field by field; `None` when nothing matched
    pub async fn update(
        &self,
        changes: Record,
        conditions: Vec<Predicate>,
        actor: Option<&str>,
        mut tx: Option<&mut B::Tx>,
    ) -> Result<Option<Row>, DatabaseError> {
        let Some(current) = self.load_for_write(conditions, tx.as_deref_mut()).await? else {
            return Ok(None);
        };
        let mut record = Record::from_row(current);
        record.merge(changes);
        self.stamp_update(&mut record, actor);

        self.hooks.before_write(&mut record, false)?;
        self.check(&record, false)?;
        self.persist(record, tx).await
    }

    /// Physically remove matching rows regardless of the soft-delete flag
    pub async fn hard_delete(&self, conditions: Vec<Predicate>, tx: Option<&mut B::Tx>) -> Result<u64, DatabaseError> {
        if conditions.iter().all(Predicate::is_empty) {
            return Err(DatabaseError::QueryError(format!(
                "refusing to hard delete every {} row",
                self.entity.name
            )));
        }
        self.backend.delete_where(self.entity, &Predicate::And(conditions), tx).await
    }

    /// Flag the matching row as deleted; `None` when nothing matched
    pub async fn soft_delete(
        &self,
        conditions: Vec<Predicate>,
        actor: Option<&str>,
        mut tx: Option<&mut B::Tx>,
    ) -> Result<Option<Row>, DatabaseError> {
        let Some(current) = self.load_for_write(conditions, tx.as_deref_mut()).await? else {
            return Ok(None);
        };
        let mut record = Record::from_row(current);
        record.set_system_field(IS_DELETED, true);
        self.stamp_update(&mut record, actor);
        self.persist(record, tx).await
    }

    fn stamp_update(&self, record: &mut Record, actor: Option<&str>) {
        if let Some(actor) = actor {
            record.set_system_field(UPDATED_BY, actor);
        }
        record.set_system_field(UPDATED_AT, Utc::now().to_rfc3339());
    }

    fn check(&self, record: &Record, creating: bool) -> Result<(), DatabaseError> {
        let errors = schema::validate(&self.entity.schema, record.fields(), creating);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DatabaseError::validation(errors))
        }
    }

    async fn persist(&self, record: Record, tx: Option<&mut B::Tx>) -> Result<Option<Row>, DatabaseError> {
        let id = match record.get(ID) {
            Some(Value::String(id)) => id.clone(),
            _ => return Err(DatabaseError::QueryError(format!("{} row without an id", self.entity.name))),
        };
        self.backend.update(self.entity, &id, &record.changes(), tx).await
    }

    /// The row a write targets, honoring the soft-delete policy
    async fn load_for_write(
        &self,
        conditions: Vec<Predicate>,
        tx: Option<&mut B::Tx>,
    ) -> Result<Option<Row>, DatabaseError> {
        let mut plan = QueryPlan::new()
            .with_conditions(conditions)
            .with_order(FieldRef::column(CREATED_AT), SortDirection::Desc)
            .with_limit(1, 0);
        if self.policy == SoftDeletePolicy::Reject {
            plan = plan.with_condition(not_deleted());
        }
        Ok(self.backend.find_all(self.entity, &plan, tx).await?.into_iter().next())
    }

    async fn fetch(&self, plan: &QueryPlan, mut tx: Option<&mut B::Tx>) -> Result<Vec<Row>, DatabaseError> {
        let mut rows = self.backend.find_all(self.entity, plan, tx.as_deref_mut()).await?;
        if !plan.include.is_empty() && !rows.is_empty() {
            self.attach(&mut rows, &plan.include, tx).await?;
        }
        Ok(rows)
    }

    /// Load each relation's rows in one query and attach them under the alias
    async fn attach(
        &self,
        rows: &mut [Row],
        relations: &[RelationDescriptor],
        mut tx: Option<&mut B::Tx>,
    ) -> Result<(), DatabaseError> {
        for relation in relations {
            let keys: Vec<String> = rows.iter().filter_map(|r| key_text(r.get(relation.local_key))).collect();

            let mut by_key: HashMap<String, Vec<Row>> = HashMap::new();
            if !keys.is_empty() {
                let mut plan = QueryPlan::new().with_condition(Predicate::one_of(relation.foreign_key, keys));
                if let Some(extra) = &relation.extra_filter {
                    plan = plan.with_condition(extra.clone());
                }
                let target = relation.target();
                for related in self.backend.find_all(target, &plan, tx.as_deref_mut()).await? {
                    if let Some(key) = key_text(related.get(relation.foreign_key)) {
                        by_key.entry(key).or_default().push(related);
                    }
                }
            }

            for row in rows.iter_mut() {
                let matched = key_text(row.get(relation.local_key))
                    .and_then(|k| by_key.get(&k).cloned())
                    .unwrap_or_default();
                let value = match relation.cardinality {
                    Cardinality::One => matched.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
                    Cardinality::Many => Value::Array(matched.into_iter().map(Value::Object).collect()),
                };
                row.insert(relation.alias.to_string(), value);
            }
        }
        Ok(())
    }
}

fn key_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
