use async_trait::async_trait;
use serde_json::{Map, Value};

use super::manager::DatabaseError;
use crate::filter::{Predicate, QueryPlan};
use crate::schema::EntityDescriptor;

pub type Row = Map<String, Value>;

/// Relational storage the entity store runs against.
///
/// Every operation optionally joins a caller-owned transaction; `None` runs
/// it on its own. Rows are JSON objects keyed by field name.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, DatabaseError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), DatabaseError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), DatabaseError>;

    /// Rows matching the plan's predicate, ordered and paged.
    /// Relations in `plan.include` only filter here (required ones); the
    /// store attaches related rows.
    async fn find_all(
        &self,
        entity: &EntityDescriptor,
        plan: &QueryPlan,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Vec<Row>, DatabaseError>;

    /// Number of rows the plan matches, ignoring limit and offset
    async fn count(
        &self,
        entity: &EntityDescriptor,
        plan: &QueryPlan,
        tx: Option<&mut Self::Tx>,
    ) -> Result<i64, DatabaseError>;

    /// Insert a complete row and return it as stored
    async fn insert(
        &self,
        entity: &EntityDescriptor,
        row: &Row,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Row, DatabaseError>;

    /// Apply `changes` to the row with `id`; `None` when it does not exist
    async fn update(
        &self,
        entity: &EntityDescriptor,
        id: &str,
        changes: &Row,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Option<Row>, DatabaseError>;

    /// Physically remove matching rows, returning how many went
    async fn delete_where(
        &self,
        entity: &EntityDescriptor,
        predicate: &Predicate,
        tx: Option<&mut Self::Tx>,
    ) -> Result<u64, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
