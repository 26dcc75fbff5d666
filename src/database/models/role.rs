use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::auth::permissions::PermissionEntry;
use crate::database::{DatabaseError, EntityHooks, Record};
use crate::schema::{EntityDescriptor, FieldDef, FieldErrors, SchemaDescriptor};

pub const NAME: &str = "role";

static DESCRIPTOR: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::new(
        NAME,
        "role",
        SchemaDescriptor::new(vec![
            FieldDef::string("name", 64).required(),
            FieldDef::text("description"),
            FieldDef::boolean("isActive").default_value(true),
            FieldDef::json("permissions").default_value(serde_json::json!([])),
        ]),
    )
});

pub fn descriptor() -> &'static EntityDescriptor {
    &DESCRIPTOR
}

/// Role row as the permission cache reads it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

fn default_active() -> bool {
    true
}

/// Rejects `permissions` values that are not a list of permission entries
pub struct RoleHooks;

impl EntityHooks for RoleHooks {
    fn before_write(&self, record: &mut Record, _creating: bool) -> Result<(), DatabaseError> {
        let Some(permissions) = record.get("permissions").filter(|v| !v.is_null()) else {
            return Ok(());
        };
        if let Err(e) = serde_json::from_value::<Vec<PermissionEntry>>(permissions.clone()) {
            let mut errors = FieldErrors::new();
            errors.insert("permissions".into(), format!("permissions must be a list of permission entries: {}", e));
            return Err(DatabaseError::validation(errors));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hooks_reject_malformed_permissions() {
        let mut record = Record::new();
        record.set("permissions", json!([{ "canView": true }]));
        assert!(RoleHooks.before_write(&mut record, true).is_err());

        let mut record = Record::new();
        record.set("permissions", json!([{ "feature": "ROLE", "canView": true }]));
        assert!(RoleHooks.before_write(&mut record, true).is_ok());
    }

    #[test]
    fn role_row_decodes_permission_list() {
        let role: Role = serde_json::from_value(json!({
            "id": "r1",
            "name": "HR",
            "isActive": true,
            "isDeleted": false,
            "permissions": [
                { "featureCode": "EMPLOYEE", "canView": true, "canAdd": false, "canEdit": true, "canDelete": false }
            ]
        }))
        .unwrap();
        assert_eq!(role.permissions.len(), 1);
        assert_eq!(role.permissions[0].feature_code, "EMPLOYEE");
        assert!(role.permissions[0].can_edit);
    }
}
