use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A system user, stored in `public.users` and scoped to a tenant by
/// `tenant_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub tenant_id: i64,

    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone: Option<String>,

    pub role: String, // admin, dentist, receptionist
    pub active: bool,

    // Professional info (dentists)
    pub cro: Option<String>,
    pub specialty: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

pub mod role {
    pub const ADMIN: &str = "admin";
    pub const DENTIST: &str = "dentist";
    pub const RECEPTIONIST: &str = "receptionist";
    pub const ALL: &[&str] = &[ADMIN, DENTIST, RECEPTIONIST];
}
