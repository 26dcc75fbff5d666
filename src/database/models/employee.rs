use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::user;
use crate::schema::{EntityDescriptor, FieldDef, RelationDescriptor, SchemaDescriptor};

pub const NAME: &str = "employee";

static DESCRIPTOR: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::new(
        NAME,
        "employee",
        SchemaDescriptor::new(vec![
            FieldDef::string("employeeCode", 40).required(),
            FieldDef::string("employeeName", 256),
        ]),
    )
    .with_relation(RelationDescriptor::has_one("user", user::descriptor, "employeeId"))
});

pub fn descriptor() -> &'static EntityDescriptor {
    &DESCRIPTOR
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub employee_code: String,
    pub employee_name: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
