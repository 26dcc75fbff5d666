use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _, Transaction};
use tracing::debug;

use super::backend::{Row, StorageBackend};
use super::manager::{DatabaseError, DatabaseManager};
use crate::filter::filter_where::quote_ident;
use crate::filter::types::SqlResult;
use crate::filter::{FilterSql, Predicate, QueryPlan};
use crate::schema::{EntityDescriptor, FieldKind, ID};

/// PostgreSQL storage over a shared pool
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    log_queries: bool,
}

impl PgBackend {
    pub fn new(pool: PgPool, log_queries: bool) -> Self {
        Self { pool, log_queries }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn log(&self, sql: &SqlResult) {
        if self.log_queries {
            debug!("SQL: {} -- params: {:?}", sql.query, sql.params);
        }
    }

    async fn fetch_rows(
        &self,
        sql: &SqlResult,
        tx: Option<&mut Transaction<'static, Postgres>>,
    ) -> Result<Vec<Row>, DatabaseError> {
        self.log(sql);
        let q = bind_all(sqlx::query(&sql.query), &sql.params);
        let rows = match tx {
            Some(tx) => q.fetch_all(&mut **tx).await?,
            None => q.fetch_all(&self.pool).await?,
        };
        rows.iter().map(json_row).collect()
    }
}

#[async_trait]
impl StorageBackend for PgBackend {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, DatabaseError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), DatabaseError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), DatabaseError> {
        Ok(tx.rollback().await?)
    }

    async fn find_all(
        &self,
        entity: &EntityDescriptor,
        plan: &QueryPlan,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Vec<Row>, DatabaseError> {
        let sql = FilterSql::new(entity)?.to_sql(plan)?;
        self.fetch_rows(&sql, tx).await
    }

    async fn count(
        &self,
        entity: &EntityDescriptor,
        plan: &QueryPlan,
        tx: Option<&mut Self::Tx>,
    ) -> Result<i64, DatabaseError> {
        let sql = FilterSql::new(entity)?.to_count_sql(plan)?;
        self.log(&sql);
        let q = bind_all(sqlx::query(&sql.query), &sql.params);
        let row = match tx {
            Some(tx) => q.fetch_one(&mut **tx).await?,
            None => q.fetch_one(&self.pool).await?,
        };
        Ok(row.try_get::<i64, _>("count")?)
    }

    async fn insert(
        &self,
        entity: &EntityDescriptor,
        row: &Row,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Row, DatabaseError> {
        let sql = insert_sql(entity, row)?;
        let mut rows = self.fetch_rows(&sql, tx).await?;
        rows.pop().ok_or_else(|| DatabaseError::QueryError(format!("insert into {} returned no row", entity.table)))
    }

    async fn update(
        &self,
        entity: &EntityDescriptor,
        id: &str,
        changes: &Row,
        tx: Option<&mut Self::Tx>,
    ) -> Result<Option<Row>, DatabaseError> {
        let sql = update_sql(entity, id, changes)?;
        Ok(self.fetch_rows(&sql, tx).await?.pop())
    }

    async fn delete_where(
        &self,
        entity: &EntityDescriptor,
        predicate: &Predicate,
        tx: Option<&mut Self::Tx>,
    ) -> Result<u64, DatabaseError> {
        let sql = FilterSql::new(entity)?.to_delete_sql(predicate)?;
        self.log(&sql);
        let q = bind_all(sqlx::query(&sql.query), &sql.params);
        let result = match tx {
            Some(tx) => q.execute(&mut **tx).await?,
            None => q.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        DatabaseManager::health_check(&self.pool).await
    }
}

/// Column type placeholders are cast to, so nulls and strings land typed
fn cast(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String | FieldKind::Text | FieldKind::Reference => "text",
        FieldKind::Boolean => "boolean",
        FieldKind::Numeric => "numeric",
        FieldKind::Date => "timestamptz",
        FieldKind::Json => "jsonb",
    }
}

/// JSON columns travel as their text form and are parsed by the cast
fn param_for(kind: FieldKind, value: &Value) -> Value {
    match (kind, value) {
        (FieldKind::Json, Value::Null) => Value::Null,
        (FieldKind::Json, v) => Value::String(v.to_string()),
        (_, v) => v.clone(),
    }
}

/// Known columns of `row` as (quoted column, placeholder) pairs
fn assignments(
    entity: &EntityDescriptor,
    row: &Row,
    params: &mut Vec<Value>,
) -> Result<Vec<(String, String)>, DatabaseError> {
    let mut out = Vec::new();
    for (name, value) in row {
        let Some(def) = entity.schema.field(name) else {
            continue;
        };
        params.push(param_for(def.kind, value));
        out.push((quote_ident(name)?, format!("${}::{}", params.len(), cast(def.kind))));
    }
    Ok(out)
}

fn insert_sql(entity: &EntityDescriptor, row: &Row) -> Result<SqlResult, DatabaseError> {
    let table = quote_ident(entity.table)?;
    let mut params = Vec::new();
    let pairs = assignments(entity, row, &mut params)?;
    if pairs.is_empty() {
        return Err(DatabaseError::QueryError(format!("nothing to insert into {}", entity.table)));
    }
    let (columns, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    Ok(SqlResult {
        query: format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING row_to_json({table}.*) AS row",
            columns.join(", "),
            values.join(", "),
            table = table
        ),
        params,
    })
}

fn update_sql(entity: &EntityDescriptor, id: &str, changes: &Row) -> Result<SqlResult, DatabaseError> {
    let table = quote_ident(entity.table)?;
    let mut params = Vec::new();
    let pairs = assignments(entity, changes, &mut params)?;
    params.push(Value::String(id.to_string()));
    let id_param = params.len();

    // nothing to change still returns the current row
    let set = if pairs.is_empty() {
        format!("{} = {}.{}", quote_ident(ID)?, table, quote_ident(ID)?)
    } else {
        pairs.iter().map(|(c, p)| format!("{} = {}", c, p)).collect::<Vec<_>>().join(", ")
    };
    Ok(SqlResult {
        query: format!(
            "UPDATE {table} SET {set} WHERE {table}.{id} = ${n} RETURNING row_to_json({table}.*) AS row",
            table = table,
            set = set,
            id = quote_ident(ID)?,
            n = id_param
        ),
        params,
    })
}

fn json_row(row: &PgRow) -> Result<Row, DatabaseError> {
    match row.try_get::<Value, _>("row")? {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::QueryError(format!("expected a JSON object row, got {}", other))),
    }
}

fn bind_all<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        q = bind_param(q, p);
    }
    q
}

fn bind_param<'q>(
    q: Query<'q, Postgres, PgArguments>,
    v: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(items) => q.bind(
            items
                .iter()
                .map(|i| match i {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<String>>(),
        ),
        Value::Object(_) => q.bind(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{role, user};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn insert_casts_each_column() {
        let sql = insert_sql(
            user::descriptor(),
            &row(json!({ "id": "u1", "isActive": true, "lastLoginDate": "2020-03-08", "bogus": 1 })),
        )
        .unwrap();
        assert_eq!(
            sql.query,
            "INSERT INTO \"user\" (\"id\", \"isActive\", \"lastLoginDate\") \
             VALUES ($1::text, $2::boolean, $3::timestamptz) RETURNING row_to_json(\"user\".*) AS row"
        );
        assert_eq!(sql.params.len(), 3);
    }

    #[test]
    fn json_fields_bind_as_text() {
        let sql = insert_sql(role::descriptor(), &row(json!({ "permissions": [{ "featureCode": "USER" }] }))).unwrap();
        assert!(sql.query.contains("$1::jsonb"));
        assert_eq!(sql.params, vec![json!("[{\"featureCode\":\"USER\"}]")]);
    }

    #[test]
    fn update_targets_id_last() {
        let sql = update_sql(user::descriptor(), "u1", &row(json!({ "email": "a@b.c" }))).unwrap();
        assert_eq!(
            sql.query,
            "UPDATE \"user\" SET \"email\" = $1::text WHERE \"user\".\"id\" = $2 RETURNING row_to_json(\"user\".*) AS row"
        );
        assert_eq!(sql.params, vec![json!("a@b.c"), json!("u1")]);
    }

    #[test]
    fn empty_update_is_a_noop_assignment() {
        let sql = update_sql(user::descriptor(), "u1", &Row::new()).unwrap();
        assert!(sql.query.contains("SET \"id\" = \"user\".\"id\""));
    }
}
