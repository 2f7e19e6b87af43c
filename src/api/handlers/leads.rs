//! Leads: potential patients, mostly captured from WhatsApp.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::Pagination;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::integrations::whatsapp::normalize_phone;
use crate::models::crm::{lead_status, Lead};
use crate::models::Patient;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LeadListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub status: Option<String>,
    pub source: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LeadPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 8, max = 20))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub source: Option<String>,
    pub contact_reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusPatch {
    pub status: String,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<LeadListQuery>,
) -> Result<HttpResponse, ApiError> {
    let search = query.search.as_deref().map(|s| format!("%{}%", s.trim()));
    let leads = sqlx::query_as::<_, Lead>(
        "SELECT * FROM leads \
         WHERE deleted_at IS NULL \
           AND ($1::text IS NULL OR status = $1) \
           AND ($2::text IS NULL OR source = $2) \
           AND ($3::text IS NULL OR name ILIKE $3 OR phone ILIKE $3) \
         ORDER BY created_at DESC \
         LIMIT $4 OFFSET $5",
    )
    .bind(&query.status)
    .bind(&query.source)
    .bind(&search)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": leads })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let lead = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(lead))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Lead, ApiError> {
    sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(ctx.db.conn())
        .await?
        .ok_or(ApiError::NotFound("lead"))
}

/// Insert a lead unless the phone is already known; returns the existing row
/// in that case. Shared with the webhook and the machine API.
pub(crate) async fn upsert_by_phone(
    conn: &mut sqlx::PgConnection,
    name: &str,
    phone: &str,
    source: &str,
    contact_reason: Option<&str>,
    created_by: i64,
) -> Result<(Lead, bool), ApiError> {
    let phone = normalize_phone(phone);
    if phone.len() < 8 {
        return Err(ApiError::validation("phone number is too short"));
    }

    let existing =
        sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE phone = $1 AND deleted_at IS NULL")
            .bind(&phone)
            .fetch_optional(&mut *conn)
            .await?;
    if let Some(lead) = existing {
        return Ok((lead, false));
    }

    let lead = sqlx::query_as::<_, Lead>(
        "INSERT INTO leads (name, phone, source, contact_reason, status, created_by) \
         VALUES ($1, $2, $3, $4, 'new', $5) \
         RETURNING *",
    )
    .bind(name)
    .bind(&phone)
    .bind(source)
    .bind(contact_reason)
    .bind(created_by)
    .fetch_one(conn)
    .await?;
    Ok((lead, true))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<LeadPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let user_id = ctx.auth.user_id();
    let (mut lead, created) = upsert_by_phone(
        ctx.db.conn(),
        &payload.name,
        &payload.phone,
        payload.source.as_deref().unwrap_or("other"),
        payload.contact_reason.as_deref(),
        user_id,
    )
    .await?;
    if !created {
        return Err(ApiError::Conflict(format!(
            "a lead with this phone already exists (id {})",
            lead.id
        )));
    }

    if payload.email.is_some() || payload.birth_date.is_some() || payload.notes.is_some() {
        lead = sqlx::query_as::<_, Lead>(
            "UPDATE leads SET email = $1, birth_date = $2, notes = $3, updated_at = now() \
             WHERE id = $4 RETURNING *",
        )
        .bind(&payload.email)
        .bind(payload.birth_date)
        .bind(&payload.notes)
        .bind(lead.id)
        .fetch_one(ctx.db.conn())
        .await?;
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "lead", Some(lead.id)),
    );
    Ok(HttpResponse::Created().json(lead))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<LeadPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let id = path.into_inner();

    let lead = sqlx::query_as::<_, Lead>(
        "UPDATE leads SET \
           name = $1, phone = $2, email = $3, birth_date = $4, source = $5, \
           contact_reason = $6, notes = $7, updated_at = now() \
         WHERE id = $8 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(normalize_phone(&payload.phone))
    .bind(&payload.email)
    .bind(payload.birth_date)
    .bind(payload.source.as_deref().unwrap_or("other"))
    .bind(&payload.contact_reason)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("lead"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "lead", Some(id)),
    );
    Ok(HttpResponse::Ok().json(lead))
}

pub async fn set_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<StatusPatch>,
) -> Result<HttpResponse, ApiError> {
    if !lead_status::is_valid(&payload.status) {
        return Err(ApiError::validation(format!("unknown status: {}", payload.status)));
    }
    if payload.status == lead_status::CONVERTED {
        return Err(ApiError::validation("use the convert endpoint to convert a lead"));
    }
    let id = path.into_inner();

    let lead = sqlx::query_as::<_, Lead>(
        "UPDATE leads SET status = $1, updated_at = now() \
         WHERE id = $2 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.status)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("lead"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "lead", Some(id))
            .with_details(json!({ "status": payload.status })),
    );
    Ok(HttpResponse::Ok().json(lead))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result =
        sqlx::query("UPDATE leads SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(ctx.db.conn())
            .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("lead"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "lead", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

/// Phone lookup used by reception when someone calls in.
pub async fn check_phone(
    mut ctx: TenantContext,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let phone = normalize_phone(&path.into_inner());
    let lead =
        sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE phone = $1 AND deleted_at IS NULL")
            .bind(&phone)
            .fetch_optional(ctx.db.conn())
            .await?;

    match lead {
        Some(lead) => Ok(HttpResponse::Ok().json(json!({ "exists": true, "lead": lead }))),
        None => Ok(HttpResponse::Ok().json(json!({ "exists": false }))),
    }
}

pub async fn stats(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, count(*) FROM leads WHERE deleted_at IS NULL GROUP BY status",
    )
    .fetch_all(ctx.db.conn())
    .await?;

    let mut by_status = serde_json::Map::new();
    let mut total = 0i64;
    for (status, count) in rows {
        total += count;
        by_status.insert(status, json!(count));
    }
    Ok(HttpResponse::Ok().json(json!({ "total": total, "by_status": by_status })))
}

/// Create a patient from the lead and mark it converted.
pub async fn convert(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let lead = fetch(&mut ctx, id).await?;
    if lead.status == lead_status::CONVERTED {
        return Err(ApiError::Conflict("lead is already converted".into()));
    }

    use sqlx::Connection;
    let mut tx = ctx.db.conn().begin().await?;

    let patient = sqlx::query_as::<_, Patient>(
        "INSERT INTO patients (name, phone, email, birth_date, notes, active) \
         VALUES ($1, $2, $3, $4, $5, TRUE) \
         RETURNING *",
    )
    .bind(&lead.name)
    .bind(&lead.phone)
    .bind(&lead.email)
    .bind(lead.birth_date)
    .bind(&lead.notes)
    .fetch_one(&mut *tx)
    .await?;

    let lead = sqlx::query_as::<_, Lead>(
        "UPDATE leads SET status = 'converted', converted_to_patient_id = $1, \
           converted_at = now(), updated_at = now() \
         WHERE id = $2 \
         RETURNING *",
    )
    .bind(patient.id)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "lead", Some(id))
            .with_details(json!({ "converted_to_patient_id": patient.id })),
    );
    Ok(HttpResponse::Ok().json(json!({ "lead": lead, "patient": patient })))
}
