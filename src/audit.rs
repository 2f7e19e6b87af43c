//! Audit trail.
//!
//! Sensitive actions land in `public.audit_logs`. Recording happens on a
//! spawned task so a slow insert never delays the response; a failed insert
//! is logged and dropped rather than failing the request.

use actix_web::HttpRequest;
use sqlx::PgPool;

use crate::api::extract::{client_ip, AuthUser};

pub mod action {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const LOGIN: &str = "login";
    pub const SIGN: &str = "sign";
    pub const EXPORT: &str = "export";
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub tenant_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub user_role: String,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<i64>,
    pub method: String,
    pub path: String,
    pub ip_address: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
}

impl AuditEntry {
    /// Entry for an authenticated request.
    pub fn from_request(
        req: &HttpRequest,
        auth: &AuthUser,
        action: &str,
        resource: &str,
        resource_id: Option<i64>,
    ) -> Self {
        Self {
            tenant_id: auth.tenant_id(),
            user_id: auth.user_id(),
            user_email: auth.claims.email.clone(),
            user_role: auth.claims.role.clone(),
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id,
            method: req.method().to_string(),
            path: req.path().to_string(),
            ip_address: client_ip(req),
            details: None,
            success: true,
        }
    }

    /// Entry for a machine request authenticated with an API key. There is
    /// no user behind it, so user fields carry a fixed marker.
    pub fn machine(tenant_id: i64, action: &str, resource: &str, resource_id: Option<i64>) -> Self {
        Self {
            tenant_id,
            user_id: 0,
            user_email: "api-key".to_string(),
            user_role: "machine".to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id,
            method: "POST".to_string(),
            path: "/api/external".to_string(),
            ip_address: None,
            details: None,
            success: true,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Fire-and-forget insert.
pub fn record(pool: &PgPool, entry: AuditEntry) {
    let pool = pool.clone();
    tokio::spawn(async move {
        let result = sqlx::query(
            "INSERT INTO public.audit_logs \
               (tenant_id, user_id, user_email, user_role, action, resource, resource_id, \
                method, path, ip_address, details, success) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(&entry.user_email)
        .bind(&entry.user_role)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(entry.resource_id)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(&entry.ip_address)
        .bind(&entry.details)
        .bind(entry.success)
        .execute(&pool)
        .await;

        if let Err(err) = result {
            tracing::error!(error = %err, resource = %entry.resource, "audit insert failed");
        }
    });
}
