use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

pub const MSG_SUCCESS: &str = "Success.";
pub const MSG_SAVED: &str = "Data saved successfully.";
pub const MSG_UPDATED: &str = "Data updated successfully.";
pub const MSG_DELETED: &str = "Data deleted successfully.";

/// Uniform success envelope: `{ message, code, data? }`
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub message: &'static str,
    pub status_code: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 with the generic success message
    pub fn success(data: T) -> Self {
        Self::with_status(data, StatusCode::OK, MSG_SUCCESS)
    }

    pub fn with_status(data: T, status_code: StatusCode, message: &'static str) -> Self {
        Self { data: Some(data), message, status_code }
    }

    /// 201 Created
    pub fn created(data: T) -> Self {
        Self::with_status(data, StatusCode::CREATED, MSG_SAVED)
    }

    pub fn updated(data: T) -> Self {
        Self::with_status(data, StatusCode::OK, MSG_UPDATED)
    }

    pub fn deleted(data: T) -> Self {
        Self::with_status(data, StatusCode::OK, MSG_DELETED)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let mut envelope = json!({
            "message": self.message,
            "code": self.status_code.as_u16(),
        });

        if let Some(data) = &self.data {
            match serde_json::to_value(data) {
                Ok(value) => envelope["data"] = value,
                Err(e) => {
                    tracing::error!("Failed to serialize response data: {}", e);
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({
                            "code": 500,
                            "message": "Failed to serialize response data"
                        })),
                    )
                        .into_response();
                }
            }
        }

        (self.status_code, Json(envelope)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::ApiError>;
