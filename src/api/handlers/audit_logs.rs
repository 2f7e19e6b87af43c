//! Audit log listing, admin-only, scoped to the caller's tenant.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::api::extract::TenantContext;
use crate::api::handlers::Pagination;
use crate::error::ApiError;
use crate::models::AuditLog;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub user_id: Option<i64>,
}

pub async fn list(
    state: web::Data<AppState>,
    ctx: TenantContext,
    query: web::Query<AuditLogQuery>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[])?;

    let logs = sqlx::query_as::<_, AuditLog>(
        "SELECT * FROM public.audit_logs \
         WHERE tenant_id = $1 \
           AND ($2::text IS NULL OR action = $2) \
           AND ($3::text IS NULL OR resource = $3) \
           AND ($4::bigint IS NULL OR user_id = $4) \
         ORDER BY created_at DESC \
         LIMIT $5 OFFSET $6",
    )
    .bind(ctx.auth.tenant_id())
    .bind(&query.action)
    .bind(&query.resource)
    .bind(query.user_id)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(state.db.pool())
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM public.audit_logs \
         WHERE tenant_id = $1 \
           AND ($2::text IS NULL OR action = $2) \
           AND ($3::text IS NULL OR resource = $3) \
           AND ($4::bigint IS NULL OR user_id = $4)",
    )
    .bind(ctx.auth.tenant_id())
    .bind(&query.action)
    .bind(&query.resource)
    .bind(query.user_id)
    .fetch_one(state.db.pool())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": logs, "total": total })))
}
