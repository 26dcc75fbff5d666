use std::sync::Arc;
use tracing::warn;

use super::permissions::PermissionKind;
use super::{AuthError, Identity};
use crate::cache::PermissionCache;

/// Allows or denies an action for a decoded identity
#[derive(Clone)]
pub struct AuthorizationGate {
    permissions: Arc<PermissionCache>,
}

impl AuthorizationGate {
    pub fn new(permissions: Arc<PermissionCache>) -> Self {
        Self { permissions }
    }

    pub fn permissions(&self) -> &Arc<PermissionCache> {
        &self.permissions
    }

    /// Gate one action.
    ///
    /// `kind` wins over `verb`; with neither resolvable the action is denied.
    pub async fn authorize(
        &self,
        identity: Option<&Identity>,
        feature_code: Option<&str>,
        kind: Option<PermissionKind>,
        verb: Option<&str>,
    ) -> Result<(), AuthError> {
        let Some(identity) = identity else {
            return Err(AuthError::Unauthenticated("Authentication required".into()));
        };
        let Some(feature_code) = feature_code else {
            return Ok(());
        };
        if identity.is_admin {
            return Ok(());
        }

        let feature_name = match self.permissions.features().get(feature_code) {
            Some(feature) => feature.name.clone(),
            None => {
                warn!("Unknown feature '{}' requested by {}", feature_code, identity.user_id);
                return Err(AuthError::UnknownFeature(feature_code.to_string()));
            }
        };

        let kind = kind.or_else(|| verb.and_then(PermissionKind::from_verb));
        let allowed = match kind {
            Some(kind) => self.permissions.check_permission(&identity.roles, feature_code, kind).await?,
            None => false,
        };
        if allowed {
            return Ok(());
        }

        let permission = kind.map(|k| k.as_str().to_string()).unwrap_or_else(|| verb.unwrap_or("UNKNOWN").to_uppercase());
        warn!(
            "Denied {} on {} for user {} (roles {:?})",
            permission, feature_code, identity.user_id, identity.roles
        );
        Err(AuthError::Forbidden { feature_code: feature_code.to_string(), feature_name, permission })
    }
}
