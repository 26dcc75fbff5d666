// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::cache::CacheError;
use crate::database::{DatabaseError, RecordError};
use crate::schema::FieldErrors;

const FK_MESSAGE: &str = "Data does not exist in reference table.";

/// Client-facing error; every failure leaving a handler passes through here
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden {
        message: String,
        feature_code: String,
        feature_name: String,
        permission: String,
    },

    // 404 Not Found
    NotFound(String),

    // 422 Unprocessable Entity
    ValidationError {
        message: String,
        errors: FieldErrors,
    },
    ForeignKeyViolation {
        errors: FieldErrors,
    },

    // 500 Internal Server Error
    StorageError {
        message: String,
        /// Underlying fault, rendered only in development
        detail: Option<String>,
    },
    UnknownFeature(String),

    // 504 Gateway Timeout
    Timeout(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden { .. } => 403,
            ApiError::NotFound(_) => 404,
            ApiError::ValidationError { .. } => 422,
            ApiError::ForeignKeyViolation { .. } => 422,
            ApiError::StorageError { .. } => 500,
            ApiError::UnknownFeature(_) => 500,
            ApiError::Timeout(_) => 504,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden { message, .. } => message,
            ApiError::NotFound(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::ForeignKeyViolation { .. } => FK_MESSAGE,
            ApiError::StorageError { message, .. } => message,
            ApiError::UnknownFeature(msg) => msg,
            ApiError::Timeout(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden { .. } => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::ForeignKeyViolation { .. } => "FOREIGN_KEY_VIOLATION",
            ApiError::StorageError { .. } => "STORAGE_ERROR",
            ApiError::UnknownFeature(_) => "UNKNOWN_FEATURE",
            ApiError::Timeout(_) => "TIMEOUT",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        self.render(crate::is_development!())
    }

    fn render(&self, with_stack: bool) -> Value {
        let mut body = json!({
            "code": self.status_code(),
            "error": self.error_code(),
            "message": self.message(),
        });
        match self {
            ApiError::ValidationError { errors, .. } | ApiError::ForeignKeyViolation { errors } => {
                body["errors"] = json!(errors);
            }
            ApiError::Forbidden { feature_code, feature_name, permission, .. } => {
                body["featureCode"] = json!(feature_code);
                body["featureName"] = json!(feature_name);
                body["permission"] = json!(permission);
            }
            ApiError::StorageError { detail: Some(detail), .. } if with_stack => {
                body["stack"] = json!(detail);
            }
            _ => {}
        }
        body
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn validation_error(message: impl Into<String>, errors: FieldErrors) -> Self {
        ApiError::ValidationError { message: message.into(), errors }
    }

    pub fn storage_error(message: impl Into<String>, detail: Option<String>) -> Self {
        ApiError::StorageError { message: message.into(), detail }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::InvalidJson(msg) => ApiError::bad_request(msg),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::Validation { message, errors } => ApiError::validation_error(message, errors),
            DatabaseError::ForeignKey { fields } => ApiError::ForeignKeyViolation {
                errors: fields.into_iter().map(|f| (f, FK_MESSAGE.to_string())).collect(),
            },
            DatabaseError::Timeout(msg) => {
                tracing::error!("Database timeout: {}", msg);
                ApiError::Timeout("The request timed out".into())
            }
            DatabaseError::Connection(msg) => {
                tracing::error!("Database connection error: {}", msg);
                ApiError::storage_error("Database temporarily unavailable", Some(msg))
            }
            // Don't expose internal SQL errors to clients
            other => {
                tracing::error!("Database error: {}", other);
                ApiError::storage_error("Database error occurred", Some(format!("{:?}", other)))
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::error!("Cache error: {}", err);
        ApiError::storage_error("Cache error occurred", Some(err.to_string()))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated(msg) => ApiError::unauthorized(msg),
            AuthError::InvalidToken(msg) => ApiError::unauthorized(format!("Invalid token: {}", msg)),
            AuthError::Forbidden { feature_code, feature_name, permission } => ApiError::Forbidden {
                message: format!("You do not have {} permission on {}", permission, feature_name),
                feature_code,
                feature_name,
                permission,
            },
            AuthError::UnknownFeature(code) => {
                tracing::error!("Route guarded by unknown feature '{}'", code);
                ApiError::UnknownFeature(format!("Unknown feature: {}", code))
            }
            AuthError::Storage(err) => err.into(),
            other => {
                tracing::error!("Auth configuration error: {}", other);
                ApiError::storage_error("Authentication unavailable", Some(other.to_string()))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for ApiError {}
