use axum::extract::State;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::database::StorageBackend;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /health - reports storage reachability
pub async fn health<B: StorageBackend>(State(backend): State<Arc<B>>) -> ApiResult<Value> {
    backend.health_check().await.map_err(|e| {
        tracing::error!("[HEALTH] storage unreachable: {}", e);
        ApiError::from(e)
    })?;
    Ok(ApiResponse::success(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
