mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;

use entity_api::auth::PermissionEntry;

fn entry(feature: &str, view: bool, add: bool, edit: bool, delete: bool) -> PermissionEntry {
    PermissionEntry {
        feature_code: feature.to_string(),
        can_view: view,
        can_add: add,
        can_edit: edit,
        can_delete: delete,
    }
}

#[tokio::test]
async fn health_endpoint_responds() -> Result<()> {
    let app = common::TestApp::new()?;
    let (status, body) = app.send(Method::GET, "/health", None, None).await?;

    assert_eq!(status, StatusCode::OK, "unexpected status: {}", status);
    assert_eq!(body["data"]["status"], json!("ok"));
    Ok(())
}

#[tokio::test]
async fn missing_token_is_unauthorized() -> Result<()> {
    let app = common::TestApp::new()?;
    let (status, body) = app.send(Method::GET, "/api/employee", None, None).await?;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("UNAUTHORIZED"));
    Ok(())
}

#[tokio::test]
async fn tampered_token_is_unauthorized() -> Result<()> {
    let app = common::TestApp::new()?;
    let token = format!("{}x", app.admin_token()?);
    let (status, _) = app.get("/api/employee", &token).await?;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn admin_bypasses_permissions() -> Result<()> {
    let app = common::TestApp::new()?;
    let token = app.admin_token()?;
    let (status, body) = app.get("/api/role", &token).await?;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["data"]["totalRecords"], json!(0));
    Ok(())
}

#[tokio::test]
async fn role_permissions_gate_each_verb() -> Result<()> {
    let app = common::TestApp::new()?;
    let role_id = app.seed_role(vec![entry("EMPLOYEE", true, false, false, false)]).await?;
    let token = app.token("user-1", vec![role_id], false)?;

    let (status, _) = app.get("/api/employee", &token).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post("/api/employee", &token, json!({ "employeeCode": "E1", "employeeName": "Ann" }))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["featureCode"], json!("EMPLOYEE"));
    assert_eq!(body["featureName"], json!("Employee"));
    assert_eq!(body["permission"], json!("CREATE"));

    // no entry for USER at all
    let (status, _) = app.get("/api/user", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn any_role_granting_is_enough() -> Result<()> {
    let app = common::TestApp::new()?;
    let reader = app.seed_role(vec![entry("EMPLOYEE", true, false, false, false)]).await?;
    let writer = app.seed_role(vec![entry("EMPLOYEE", false, true, false, false)]).await?;
    let token = app.token("user-2", vec![reader, writer], false)?;

    let (status, body) = app
        .post("/api/employee", &token, json!({ "employeeCode": "E2", "employeeName": "Ben" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["data"]["createdBy"], json!("user-2"));
    Ok(())
}

#[tokio::test]
async fn unknown_role_denies() -> Result<()> {
    let app = common::TestApp::new()?;
    let token = app.token("user-3", vec!["no-such-role".to_string()], false)?;

    let (status, _) = app.get("/api/employee", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn role_edit_takes_effect_immediately() -> Result<()> {
    let app = common::TestApp::new()?;
    let role_id = app.seed_role(vec![entry("EMPLOYEE", true, false, false, false)]).await?;
    let token = app.token("user-4", vec![role_id.clone()], false)?;

    // warm the cache
    let (status, _) = app.get("/api/employee", &token).await?;
    assert_eq!(status, StatusCode::OK);

    let admin = app.admin_token()?;
    let (status, body) = app
        .put(&format!("/api/role/{}", role_id), &admin, json!({ "permissions": [] }))
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let (status, _) = app.get("/api/employee", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn malformed_role_permissions_are_rejected() -> Result<()> {
    let app = common::TestApp::new()?;
    let admin = app.admin_token()?;
    let (status, body) = app
        .post("/api/role", &admin, json!({ "name": "broken", "permissions": "everything" }))
        .await?;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body: {}", body);
    assert!(body["errors"]["permissions"].is_string());
    Ok(())
}
