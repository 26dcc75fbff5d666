use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::employee;
use crate::schema::{not_deleted, EntityDescriptor, FieldDef, RelationDescriptor, SchemaDescriptor};

pub const NAME: &str = "user";

static DESCRIPTOR: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::new(
        NAME,
        "user",
        SchemaDescriptor::new(vec![
            FieldDef::reference("employeeId", employee::NAME),
            FieldDef::string("email", 128),
            FieldDef::string("profilePicture", 256),
            FieldDef::boolean("isActive").default_value(true),
            FieldDef::date("lastLoginDate"),
        ]),
    )
    // users of a deleted employee drop out of lists that include the employee
    .with_relation(
        RelationDescriptor::belongs_to("employee", employee::descriptor, "employeeId")
            .required()
            .filtered(not_deleted()),
    )
});

pub fn descriptor() -> &'static EntityDescriptor {
    &DESCRIPTOR
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub employee_id: Option<String>,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
    pub is_active: Option<bool>,
    pub last_login_date: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
