use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One audited action (`public.audit_logs`, shared across tenants).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub created_at: DateTime<Utc>,

    pub tenant_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub user_role: String,

    pub action: String, // create, update, delete, login, sign, export
    pub resource: String,
    pub resource_id: Option<i64>,

    pub method: String,
    pub path: String,
    pub ip_address: Option<String>,

    pub details: Option<serde_json::Value>,
    pub success: bool,
}
