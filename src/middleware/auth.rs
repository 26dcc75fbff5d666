use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::auth::{AuthorizationGate, Identity, IdentityDecoder, PermissionKind};
use crate::error::ApiError;

/// Bearer token authentication: decodes the token and injects the [`Identity`]
pub async fn jwt_auth_middleware(
    State(decoder): State<Arc<dyn IdentityDecoder>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_jwt_from_headers(&headers) {
        Ok(token) => token,
        Err(msg) => return ApiError::unauthorized(msg).into_response(),
    };

    match decoder.decode(&token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            ApiError::from(e).into_response()
        }
    }
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

/// Per-route authorization against one feature code
#[derive(Clone)]
pub struct FeatureGuard {
    pub gate: AuthorizationGate,
    pub feature_code: &'static str,
}

/// Runs the authorization gate with the permission kind implied by the HTTP method
pub async fn feature_guard_middleware(State(guard): State<FeatureGuard>, request: Request, next: Next) -> Response {
    let identity = request.extensions().get::<Identity>().cloned();
    let kind = PermissionKind::from_method(request.method());
    let verb = request.method().as_str().to_string();

    match guard.gate.authorize(identity.as_ref(), Some(guard.feature_code), kind, Some(verb.as_str())).await {
        Ok(()) => next.run(request).await,
        Err(e) => ApiError::from(e).into_response(),
    }
}
