pub mod auth;
pub mod response;

pub use auth::{feature_guard_middleware, jwt_auth_middleware, FeatureGuard};
pub use response::{ApiResponse, ApiResult};
