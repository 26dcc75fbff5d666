use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::Identity;
use crate::cache::PermissionCache;
use crate::config::QueryConfig;
use crate::database::{EntityStore, Record, StorageBackend};
use crate::error::ApiError;
use crate::filter::{Filter, Predicate};
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::ID;

/// Router state for one entity's CRUD routes
pub struct EntityState<B: StorageBackend> {
    pub store: EntityStore<B>,
    pub query: Arc<QueryConfig>,
    /// Set for the role routes: edits drop the cached permission list
    pub permissions: Option<Arc<PermissionCache>>,
    pub audit: bool,
}

impl<B: StorageBackend> Clone for EntityState<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            query: self.query.clone(),
            permissions: self.permissions.clone(),
            audit: self.audit,
        }
    }
}

impl<B: StorageBackend> EntityState<B> {
    fn failed(&self, operation: &str, err: impl Into<ApiError>) -> ApiError {
        let err = err.into();
        if err.status_code() >= 500 {
            error!("[{}-{}] {}", operation, self.store.entity().name, err);
        } else {
            warn!("[{}-{}] {}", operation, self.store.entity().name, err);
        }
        err
    }

    fn not_found(&self, operation: &str, id: &str) -> ApiError {
        self.failed(operation, ApiError::not_found(format!("{} {} not found", self.store.entity().name, id)))
    }

    fn audit(&self, operation: &str, identity: &Identity, id: &str) {
        if self.audit {
            info!(
                actor = %identity.user_id,
                entity = self.store.entity().name,
                id = %id,
                "[{}-{}] audit",
                operation,
                self.store.entity().name
            );
        }
    }

    async fn role_changed(&self, id: &str) {
        if let Some(permissions) = &self.permissions {
            permissions.invalidate(id).await;
        }
    }
}

fn body(operation: &str, payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| {
            warn!("[{}] rejected body: {}", operation, rejection.body_text());
            ApiError::bad_request(rejection.body_text())
        })
}

/// GET /api/{entity} - paged, filtered, sorted list
pub async fn list<B: StorageBackend>(
    State(state): State<EntityState<B>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Value> {
    let entity = state.store.entity();
    let plan = Filter::new(entity, &state.query).compile(&params);
    let page_size = plan.limit.unwrap_or(state.query.default_page_size).max(1);
    let page_index = plan.offset.unwrap_or(0) / page_size + 1;

    let result = state.store.get_all(plan, None).await.map_err(|e| state.failed("GET_LIST", e))?;

    let total_pages = (result.total_count + page_size - 1) / page_size;
    Ok(ApiResponse::success(json!({
        "pageIndex": page_index,
        "pageSize": page_size,
        "totalPages": total_pages,
        "totalRecords": result.total_count,
        "rows": result.rows,
    })))
}

/// GET /api/{entity}/:id - relations included unless `skipInclude=true`
pub async fn get<B: StorageBackend>(
    State(state): State<EntityState<B>>,
    Path(id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Value> {
    let include = Filter::include_requested(&params, true);
    match state.store.get_by_id(&id, None, include, None).await {
        Ok(Some(row)) => Ok(ApiResponse::success(Value::Object(row))),
        Ok(None) => Err(state.not_found("GET_DETAIL", &id)),
        Err(e) => Err(state.failed("GET_DETAIL", e)),
    }
}

/// POST /api/{entity}
pub async fn create<B: StorageBackend>(
    State(state): State<EntityState<B>>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<BTreeMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let input = body("CREATE", payload)?;
    let record = Record::from_input(input, &state.store.entity().schema).map_err(|e| state.failed("CREATE", e))?;
    let include = Filter::include_requested(&params, false);

    let row = state
        .store
        .create(record, Some(&identity.user_id), include, None)
        .await
        .map_err(|e| state.failed("CREATE", e))?;

    let id = row.get(ID).and_then(Value::as_str).unwrap_or_default().to_string();
    state.audit("CREATE", &identity, &id);
    Ok(ApiResponse::created(Value::Object(row)))
}

/// PUT /api/{entity}/:id
pub async fn update<B: StorageBackend>(
    State(state): State<EntityState<B>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let input = body("UPDATE", payload)?;
    let changes = Record::from_input(input, &state.store.entity().schema).map_err(|e| state.failed("UPDATE", e))?;

    let row = state
        .store
        .update(changes, vec![Predicate::eq(ID, id.as_str())], Some(&identity.user_id), None)
        .await
        .map_err(|e| state.failed("UPDATE", e))?
        .ok_or_else(|| state.not_found("UPDATE", &id))?;

    state.role_changed(&id).await;
    state.audit("UPDATE", &identity, &id);
    Ok(ApiResponse::updated(Value::Object(row)))
}

/// DELETE /api/{entity}/:id - sets `isDeleted`
pub async fn soft_delete<B: StorageBackend>(
    State(state): State<EntityState<B>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let row = state
        .store
        .soft_delete(vec![Predicate::eq(ID, id.as_str())], Some(&identity.user_id), None)
        .await
        .map_err(|e| state.failed("DELETE", e))?
        .ok_or_else(|| state.not_found("DELETE", &id))?;

    state.role_changed(&id).await;
    state.audit("DELETE", &identity, &id);
    Ok(ApiResponse::deleted(Value::Object(row)))
}

/// DELETE /api/{entity}/:id/hard - removes the row, deleted or not
pub async fn hard_delete<B: StorageBackend>(
    State(state): State<EntityState<B>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let removed = state
        .store
        .hard_delete(vec![Predicate::eq(ID, id.as_str())], None)
        .await
        .map_err(|e| state.failed("HARD_DELETE", e))?;
    if removed == 0 {
        return Err(state.not_found("HARD_DELETE", &id));
    }

    state.role_changed(&id).await;
    state.audit("HARD_DELETE", &identity, &id);
    Ok(ApiResponse::deleted(json!({ "id": id, "removed": removed })))
}
