use sqlx::postgres::{PgDatabaseError, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::filter::FilterError;
use crate::schema::FieldErrors;

/// Errors from the storage layer, already classified by cause
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {message}")]
    Validation { message: String, errors: FieldErrors },

    #[error("Data does not exist in reference table.")]
    ForeignKey { fields: Vec<String> },

    #[error("Query timed out: {0}")]
    Timeout(String),

    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl DatabaseError {
    pub fn validation(errors: FieldErrors) -> Self {
        let message = errors.values().cloned().collect::<Vec<_>>().join(", ");
        DatabaseError::Validation { message, errors }
    }
}

impl From<FilterError> for DatabaseError {
    fn from(err: FilterError) -> Self {
        DatabaseError::QueryError(err.to_string())
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        classify(err)
    }
}

/// Map driver errors onto the taxonomy using SQLSTATE codes
fn classify(err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::PoolTimedOut => DatabaseError::Timeout("connection pool timed out".into()),
        sqlx::Error::PoolClosed => DatabaseError::Connection("connection pool closed".into()),
        sqlx::Error::Io(e) => DatabaseError::Connection(e.to_string()),
        sqlx::Error::Tls(e) => DatabaseError::Connection(e.to_string()),
        sqlx::Error::RowNotFound => DatabaseError::NotFound("row not found".into()),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            let pg = db_err.try_downcast_ref::<PgDatabaseError>();
            let detail = pg.and_then(|e| e.detail()).unwrap_or_default().to_string();
            let column = pg.and_then(|e| e.column()).map(str::to_string);
            let message = db_err.message().to_string();

            match code.as_str() {
                "23503" => DatabaseError::ForeignKey { fields: key_fields(&detail) },
                "57014" => DatabaseError::Timeout(message),
                "23502" | "23514" | "22001" | "22P02" | "23505" => {
                    let field = column
                        .or_else(|| key_fields(&detail).into_iter().next())
                        .unwrap_or_else(|| "record".to_string());
                    let mut errors = FieldErrors::new();
                    errors.insert(field, if detail.is_empty() { message.clone() } else { detail });
                    DatabaseError::Validation { message, errors }
                }
                _ => DatabaseError::Sqlx(sqlx::Error::Database(db_err)),
            }
        }
        other => DatabaseError::Sqlx(other),
    }
}

/// Field names out of a `Key (a, b)=(...)` detail message
fn key_fields(detail: &str) -> Vec<String> {
    detail
        .split_once("Key (")
        .and_then(|(_, rest)| rest.split_once(")=("))
        .map(|(fields, _)| fields.split(',').map(|f| f.trim().trim_matches('"').to_string()).collect())
        .unwrap_or_default()
}

/// Connection pool setup for the primary database
pub struct DatabaseManager;

impl DatabaseManager {
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let url = config.url.as_deref().ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;
        info!("Created database pool (max {} connections)", config.max_connections);
        Ok(pool)
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_detail() {
        assert_eq!(
            key_fields("Key (employeeId)=(abc) is not present in table \"employee\"."),
            vec!["employeeId".to_string()]
        );
        assert_eq!(key_fields("Key (a, b)=(1, 2) already exists."), vec!["a".to_string(), "b".to_string()]);
        assert!(key_fields("nothing here").is_empty());
    }

    #[test]
    fn pool_errors_classify() {
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), DatabaseError::Timeout(_)));
        assert!(matches!(classify(sqlx::Error::PoolClosed), DatabaseError::Connection(_)));
    }

    #[test]
    fn validation_message_joins_field_errors() {
        let mut errors = FieldErrors::new();
        errors.insert("a".into(), "a cannot be null".into());
        errors.insert("b".into(), "b is too long".into());
        match DatabaseError::validation(errors) {
            DatabaseError::Validation { message, errors } => {
                assert_eq!(message, "a cannot be null, b is too long");
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
