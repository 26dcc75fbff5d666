pub mod features;
pub mod gate;
pub mod permissions;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::database::DatabaseError;

pub use features::{Feature, FeatureRegistry};
pub use gate::AuthorizationGate;
pub use permissions::{PermissionEntry, PermissionKind};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token secret not configured")]
    InvalidSecret,

    #[error("Token generation error: {0}")]
    TokenGeneration(String),

    #[error("You do not have {permission} permission on {feature_name}")]
    Forbidden { feature_code: String, feature_name: String, permission: String },

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// Token payload. `roles` accepts a single role id or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    #[serde(alias = "id")]
    pub user_id: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>, is_admin: bool, expiry_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            roles,
            is_admin,
            exp: (now + Duration::seconds(expiry_secs)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(role)) => vec![role],
        Some(OneOrMany::Many(roles)) => roles,
        None => vec![],
    })
}

/// Caller identity attached to a request once its token is verified
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self { user_id: claims.user_id, roles: claims.roles, is_admin: claims.is_admin }
    }
}

/// Turns a bearer credential into an identity
pub trait IdentityDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 token verification
pub struct JwtDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl JwtDecoder {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::InvalidSecret);
        }
        Ok(Self { key: DecodingKey::from_secret(secret.as_bytes()), validation: Validation::default() })
    }
}

impl IdentityDecoder for JwtDecoder {
    fn decode(&self, token: &str) -> Result<Identity, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims.into())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))
}
