use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability requested against a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionKind {
    Read,
    Create,
    Update,
    Delete,
}

impl PermissionKind {
    /// Map an action verb (`read`, `create`, `update`, `delete`)
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "read" => Some(PermissionKind::Read),
            "create" => Some(PermissionKind::Create),
            "update" => Some(PermissionKind::Update),
            "delete" => Some(PermissionKind::Delete),
            _ => None,
        }
    }

    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET | Method::HEAD => Some(PermissionKind::Read),
            Method::POST => Some(PermissionKind::Create),
            Method::PUT | Method::PATCH => Some(PermissionKind::Update),
            Method::DELETE => Some(PermissionKind::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::Read => "READ",
            PermissionKind::Create => "CREATE",
            PermissionKind::Update => "UPDATE",
            PermissionKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One feature's capability flags within a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    #[serde(alias = "feature")]
    pub feature_code: String,
    #[serde(default)]
    pub can_view: bool,
    #[serde(default)]
    pub can_add: bool,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
}

impl PermissionEntry {
    pub fn allows(&self, feature_code: &str, kind: PermissionKind) -> bool {
        self.feature_code == feature_code
            && match kind {
                PermissionKind::Read => self.can_view,
                PermissionKind::Create => self.can_add,
                PermissionKind::Update => self.can_edit,
                PermissionKind::Delete => self.can_delete,
            }
    }
}

/// Whether any entry grants `kind` on the feature
pub fn grants(entries: &[PermissionEntry], feature_code: &str, kind: PermissionKind) -> bool {
    entries.iter().any(|e| e.allows(feature_code, kind))
}
