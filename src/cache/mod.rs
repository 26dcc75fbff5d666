//! Key/value cache backends and the role permission cache built on them.

pub mod memory;
pub mod permission;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryCache;
pub use permission::{EntityRoleStore, PermissionCache, RoleStore};
pub use postgres::PgCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Cache value error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared cache contract: every entry carries its own time-to-live
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn init(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;
}
