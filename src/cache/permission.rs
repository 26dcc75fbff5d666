use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::CacheBackend;
use crate::auth::features::FeatureRegistry;
use crate::auth::permissions::{grants, PermissionEntry, PermissionKind};
use crate::auth::AuthError;
use crate::database::models::role::Role;
use crate::database::{DatabaseError, EntityStore, StorageBackend};
use crate::filter::Predicate;
use crate::schema::ID;

/// Durable source of role permissions
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Permission entries of an active role; `None` when missing or inactive
    async fn load_permissions(&self, role_id: &str) -> Result<Option<Vec<PermissionEntry>>, DatabaseError>;
}

/// Role store over the `role` entity
pub struct EntityRoleStore<B: StorageBackend> {
    roles: EntityStore<B>,
}

impl<B: StorageBackend> EntityRoleStore<B> {
    pub fn new(roles: EntityStore<B>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl<B: StorageBackend> RoleStore for EntityRoleStore<B> {
    async fn load_permissions(&self, role_id: &str) -> Result<Option<Vec<PermissionEntry>>, DatabaseError> {
        let conditions = vec![Predicate::eq(ID, role_id), Predicate::eq("isActive", true)];
        let Some(row) = self.roles.get_one(conditions, None, false, None).await? else {
            return Ok(None);
        };
        let role: Role = serde_json::from_value(Value::Object(row))
            .map_err(|e| DatabaseError::QueryError(format!("malformed role {}: {}", role_id, e)))?;
        Ok(Some(role.permissions))
    }
}

/// Read-through role -> permissions cache with a fixed TTL.
///
/// Cache faults degrade to a store read; store faults propagate.
pub struct PermissionCache {
    cache: Arc<dyn CacheBackend>,
    roles: Arc<dyn RoleStore>,
    features: Arc<FeatureRegistry>,
    ttl: Duration,
    prefix: String,
}

impl PermissionCache {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        roles: Arc<dyn RoleStore>,
        features: Arc<FeatureRegistry>,
        ttl: Duration,
        app_name: &str,
    ) -> Self {
        Self { cache, roles, features, ttl, prefix: format!("{}-", app_name) }
    }

    pub fn features(&self) -> &FeatureRegistry {
        &self.features
    }

    fn key(&self, role_id: &str) -> String {
        format!("{}role-{}", self.prefix, role_id)
    }

    /// True when any of `roles` grants `kind` on the feature
    pub async fn check_permission(
        &self,
        roles: &[String],
        feature_code: &str,
        kind: PermissionKind,
    ) -> Result<bool, AuthError> {
        if !self.features.contains(feature_code) {
            warn!("Permission check against unknown feature '{}'", feature_code);
            return Ok(false);
        }
        for role in roles {
            let entries = self.permissions_for(role).await?;
            if grants(&entries, feature_code, kind) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn permissions_for(&self, role_id: &str) -> Result<Vec<PermissionEntry>, AuthError> {
        let key = self.key(role_id);
        match self.cache.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<PermissionEntry>>(value) {
                Ok(entries) => {
                    debug!("Permission cache hit for {}", key);
                    return Ok(entries);
                }
                Err(e) => warn!("Discarding malformed cache entry {}: {}", key, e),
            },
            Ok(None) => debug!("Permission cache miss for {}", key),
            Err(e) => warn!("Permission cache read failed for {}: {}", key, e),
        }

        let Some(entries) = self.roles.load_permissions(role_id).await? else {
            debug!("Role {} missing or inactive", role_id);
            return Ok(vec![]);
        };
        match serde_json::to_value(&entries) {
            Ok(value) => {
                if let Err(e) = self.cache.set(&key, value, self.ttl).await {
                    warn!("Permission cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => warn!("Could not encode permissions for {}: {}", key, e),
        }
        Ok(entries)
    }

    /// Drop a role's cached permissions so the next check reloads them
    pub async fn invalidate(&self, role_id: &str) {
        if let Err(e) = self.cache.del(&self.key(role_id)).await {
            warn!("Permission cache invalidation failed for {}: {}", role_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        loads: AtomicUsize,
        entries: Vec<PermissionEntry>,
    }

    #[async_trait]
    impl RoleStore for CountingStore {
        async fn load_permissions(&self, role_id: &str) -> Result<Option<Vec<PermissionEntry>>, DatabaseError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok((role_id == "hr").then(|| self.entries.clone()))
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Serialization(serde_json::from_str::<Value>("{").unwrap_err()))
        }
        async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Serialization(serde_json::from_str::<Value>("{").unwrap_err()))
        }
        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn store() -> Arc<CountingStore> {
        Arc::new(CountingStore {
            loads: AtomicUsize::new(0),
            entries: vec![PermissionEntry {
                feature_code: "EMPLOYEE".into(),
                can_view: true,
                can_add: false,
                can_edit: false,
                can_delete: false,
            }],
        })
    }

    fn cache_with(backend: Arc<dyn CacheBackend>, roles: Arc<CountingStore>, ttl: Duration) -> PermissionCache {
        PermissionCache::new(backend, roles, Arc::new(FeatureRegistry::default()), ttl, "app")
    }

    #[tokio::test]
    async fn populates_once_within_ttl_and_reloads_after() {
        let roles = store();
        let cache = cache_with(Arc::new(MemoryCache::new(100)), roles.clone(), Duration::from_millis(80));
        let hr = vec!["hr".to_string()];

        assert!(cache.check_permission(&hr, "EMPLOYEE", PermissionKind::Read).await.unwrap());
        assert!(!cache.check_permission(&hr, "EMPLOYEE", PermissionKind::Delete).await.unwrap());
        assert!(cache.check_permission(&hr, "EMPLOYEE", PermissionKind::Read).await.unwrap());
        assert_eq!(roles.loads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.check_permission(&hr, "EMPLOYEE", PermissionKind::Read).await.unwrap());
        assert_eq!(roles.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_granting_role_wins_and_empty_roles_deny() {
        let roles = store();
        let cache = cache_with(Arc::new(MemoryCache::new(100)), roles.clone(), Duration::from_secs(30));
        let many = vec!["nobody".to_string(), "hr".to_string()];
        assert!(cache.check_permission(&many, "EMPLOYEE", PermissionKind::Read).await.unwrap());
        assert!(!cache.check_permission(&[], "EMPLOYEE", PermissionKind::Read).await.unwrap());
        assert!(!cache.check_permission(&many, "USER", PermissionKind::Read).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_feature_denies_without_store_access() {
        let roles = store();
        let cache = cache_with(Arc::new(MemoryCache::new(100)), roles.clone(), Duration::from_secs(30));
        assert!(!cache.check_permission(&["hr".into()], "PAYROLL", PermissionKind::Read).await.unwrap());
        assert_eq!(roles.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let roles = store();
        let cache = cache_with(Arc::new(MemoryCache::new(100)), roles.clone(), Duration::from_secs(30));
        cache.permissions_for("hr").await.unwrap();
        cache.invalidate("hr").await;
        cache.permissions_for("hr").await.unwrap();
        assert_eq!(roles.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_faults_fall_back_to_store() {
        let roles = store();
        let cache = cache_with(Arc::new(BrokenCache), roles.clone(), Duration::from_secs(30));
        assert!(cache.check_permission(&["hr".into()], "EMPLOYEE", PermissionKind::Read).await.unwrap());
        assert!(cache.check_permission(&["hr".into()], "EMPLOYEE", PermissionKind::Read).await.unwrap());
        assert_eq!(roles.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn keys_are_namespaced_by_app() {
        let backend = Arc::new(MemoryCache::new(100));
        let cache = cache_with(backend.clone(), store(), Duration::from_secs(30));
        cache.permissions_for("hr").await.unwrap();
        assert!(backend.get("app-role-hr").await.unwrap().is_some());
    }
}
