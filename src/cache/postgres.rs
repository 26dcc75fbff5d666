use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;

use super::{CacheBackend, CacheError};

/// Cache shared by every process on the same database
#[derive(Clone)]
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheBackend for PgCache {
    async fn init(&self) -> Result<(), CacheError> {
        sqlx::query(
            "CREATE UNLOGGED TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        let purged = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!("Postgres cache ready ({} expired entries purged)", purged);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = $1 AND expires_at > now()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<Value, _>("value")?),
            None => None,
        })
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at)
             VALUES ($1, $2, now() + ($3::bigint * interval '1 millisecond'))
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = $1").bind(key).execute(&self.pool).await?;
        Ok(())
    }
}
