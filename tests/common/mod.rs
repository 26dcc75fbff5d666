#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use entity_api::auth::{generate_jwt, Claims, PermissionEntry};
use entity_api::cache::MemoryCache;
use entity_api::config::AppConfig;
use entity_api::database::models::role;
use entity_api::database::{EntityStore, MemoryBackend, Record};
use entity_api::{app, AppContext};

/// In-process router over the in-memory backend
pub struct TestApp {
    pub router: Router,
    pub backend: Arc<MemoryBackend>,
    pub config: AppConfig,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_config(AppConfig::development())
    }

    pub fn with_config(config: AppConfig) -> Result<Self> {
        let backend = Arc::new(MemoryBackend::new());
        let cache = Arc::new(MemoryCache::new(config.cache.max_capacity));
        let ctx = AppContext::new(backend.clone(), cache, &config).context("building context")?;
        Ok(Self { router: app(ctx), backend, config })
    }

    pub fn admin_token(&self) -> Result<String> {
        self.token("admin-1", vec![], true)
    }

    pub fn token(&self, user_id: &str, roles: Vec<String>, is_admin: bool) -> Result<String> {
        let claims = Claims::new(user_id, roles, is_admin, self.config.security.token_expiry_secs);
        Ok(generate_jwt(&claims, &self.config.security.token_secret)?)
    }

    /// Insert a role straight through the store, bypassing the HTTP gate
    pub async fn seed_role(&self, permissions: Vec<PermissionEntry>) -> Result<String> {
        let store = EntityStore::new(self.backend.clone(), role::descriptor());
        let input = json!({ "name": "seeded", "permissions": permissions });
        let record = Record::from_input(input, &role::descriptor().schema)?;
        let row = store.create(record, Some("seed"), false, None).await?;
        row.get("id").and_then(Value::as_str).map(str::to_string).context("role id")
    }

    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let payload = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
        Ok((status, payload))
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.send(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.send(Method::DELETE, uri, Some(token), None).await
    }

    /// Create an employee as admin and return its id
    pub async fn create_employee(&self, code: &str, name: &str) -> Result<String> {
        let token = self.admin_token()?;
        let (status, body) = self
            .post("/api/employee", &token, json!({ "employeeCode": code, "employeeName": name }))
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "create employee failed: {} {}", status, body);
        body["data"]["id"].as_str().map(str::to_string).context("employee id")
    }
}
