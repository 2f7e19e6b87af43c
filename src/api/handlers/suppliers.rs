//! Product suppliers.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::Pagination;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::Supplier;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SupplierListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SupplierPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub cnpj: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub notes: Option<String>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<SupplierListQuery>,
) -> Result<HttpResponse, ApiError> {
    let search = query.search.as_deref().map(|s| format!("%{}%", s.trim()));
    let suppliers = sqlx::query_as::<_, Supplier>(
        "SELECT * FROM suppliers \
         WHERE deleted_at IS NULL \
           AND ($1::text IS NULL OR name ILIKE $1 OR cnpj ILIKE $1) \
         ORDER BY name \
         LIMIT $2 OFFSET $3",
    )
    .bind(&search)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": suppliers })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let supplier = sqlx::query_as::<_, Supplier>(
        "SELECT * FROM suppliers WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(path.into_inner())
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("supplier"))?;
    Ok(HttpResponse::Ok().json(supplier))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<SupplierPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let supplier = sqlx::query_as::<_, Supplier>(
        "INSERT INTO suppliers \
           (name, cnpj, email, phone, address, city, state, zip_code, notes, active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE) \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.cnpj)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.address)
    .bind(&payload.city)
    .bind(&payload.state)
    .bind(&payload.zip_code)
    .bind(&payload.notes)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "supplier",
            Some(supplier.id),
        ),
    );
    Ok(HttpResponse::Created().json(supplier))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<SupplierPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let id = path.into_inner();

    let supplier = sqlx::query_as::<_, Supplier>(
        "UPDATE suppliers SET \
           name = $1, cnpj = $2, email = $3, phone = $4, address = $5, city = $6, \
           state = $7, zip_code = $8, notes = $9, updated_at = now() \
         WHERE id = $10 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.cnpj)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.address)
    .bind(&payload.city)
    .bind(&payload.state)
    .bind(&payload.zip_code)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("supplier"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "supplier", Some(id)),
    );
    Ok(HttpResponse::Ok().json(supplier))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result = sqlx::query(
        "UPDATE suppliers SET deleted_at = now(), active = FALSE \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(ctx.db.conn())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("supplier"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "supplier", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}
