use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{features, AuthError, AuthorizationGate, FeatureRegistry, IdentityDecoder, JwtDecoder};
use crate::cache::{CacheBackend, EntityRoleStore, PermissionCache};
use crate::config::{AppConfig, QueryConfig};
use crate::database::models::{employee, role, user};
use crate::database::{EntityHooks, EntityStore, NoHooks, StorageBackend};
use crate::handlers::{entity, health, EntityState};
use crate::middleware::{feature_guard_middleware, jwt_auth_middleware, FeatureGuard};
use crate::schema::EntityDescriptor;

/// Everything the router needs, wired once at startup
pub struct AppContext<B: StorageBackend> {
    pub backend: Arc<B>,
    pub query: Arc<QueryConfig>,
    pub permissions: Arc<PermissionCache>,
    pub decoder: Arc<dyn IdentityDecoder>,
    pub audit: bool,
}

impl<B: StorageBackend> AppContext<B> {
    /// Wire the permission cache over the role store and the token decoder
    pub fn new(backend: Arc<B>, cache: Arc<dyn CacheBackend>, config: &AppConfig) -> Result<Self, AuthError> {
        let roles = EntityStore::new(backend.clone(), role::descriptor()).with_hooks(Arc::new(role::RoleHooks));
        let permissions = Arc::new(PermissionCache::new(
            cache,
            Arc::new(EntityRoleStore::new(roles)),
            Arc::new(FeatureRegistry::default()),
            config.cache.permission_ttl(),
            &config.name,
        ));

        Ok(Self {
            backend,
            query: Arc::new(config.query.clone()),
            permissions,
            decoder: Arc::new(JwtDecoder::new(&config.security.token_secret)?),
            audit: config.security.enable_audit_logging,
        })
    }

    fn entity_routes(
        &self,
        descriptor: &'static EntityDescriptor,
        feature_code: &'static str,
        hooks: Arc<dyn EntityHooks>,
        invalidates_permissions: bool,
    ) -> Router {
        let state = EntityState {
            store: EntityStore::new(self.backend.clone(), descriptor).with_hooks(hooks),
            query: self.query.clone(),
            permissions: invalidates_permissions.then(|| self.permissions.clone()),
            audit: self.audit,
        };
        let guard = FeatureGuard { gate: AuthorizationGate::new(self.permissions.clone()), feature_code };

        Router::new()
            .route("/", get(entity::list::<B>).post(entity::create::<B>))
            .route(
                "/:id",
                get(entity::get::<B>).put(entity::update::<B>).delete(entity::soft_delete::<B>),
            )
            .route("/:id/hard", delete(entity::hard_delete::<B>))
            .route_layer(from_fn_with_state(guard, feature_guard_middleware))
            .with_state(state)
    }
}

/// Build the application router
pub fn app<B: StorageBackend>(ctx: AppContext<B>) -> Router {
    let api = Router::new()
        .nest("/api/employee", ctx.entity_routes(employee::descriptor(), features::EMPLOYEE, Arc::new(NoHooks), false))
        .nest("/api/user", ctx.entity_routes(user::descriptor(), features::USER, Arc::new(NoHooks), false))
        .nest("/api/role", ctx.entity_routes(role::descriptor(), features::ROLE, Arc::new(role::RoleHooks), true))
        .route_layer(from_fn_with_state(ctx.decoder.clone(), jwt_auth_middleware));

    Router::new()
        .route("/health", get(health::health::<B>))
        .with_state(ctx.backend.clone())
        .merge(api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
