//! Waiting list: patients hoping for an earlier slot.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::Connection;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::Pagination;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::crm::{waiting_status, WaitingListEntry};
use crate::models::Appointment;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WaitingListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub status: Option<String>,
    pub dentist_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WaitingEntryPayload {
    pub patient_id: i64,
    pub dentist_id: Option<i64>,
    pub procedure: Option<String>,
    pub preferred_dates: Option<serde_json::Value>,
    pub priority: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SchedulePayload {
    pub dentist_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub procedure: Option<String>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<WaitingListQuery>,
) -> Result<HttpResponse, ApiError> {
    let entries = sqlx::query_as::<_, WaitingListEntry>(
        "SELECT * FROM waiting_list \
         WHERE deleted_at IS NULL \
           AND ($1::text IS NULL OR status = $1) \
           AND ($2::bigint IS NULL OR dentist_id = $2 OR dentist_id IS NULL) \
         ORDER BY CASE priority WHEN 'urgent' THEN 0 ELSE 1 END, created_at \
         LIMIT $3 OFFSET $4",
    )
    .bind(&query.status)
    .bind(query.dentist_id)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": entries })))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<WaitingListEntry, ApiError> {
    sqlx::query_as::<_, WaitingListEntry>(
        "SELECT * FROM waiting_list WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("waiting list entry"))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<WaitingEntryPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let priority = payload.priority.as_deref().unwrap_or("normal");
    if priority != "normal" && priority != "urgent" {
        return Err(ApiError::validation("priority must be normal or urgent"));
    }

    let entry = sqlx::query_as::<_, WaitingListEntry>(
        "INSERT INTO waiting_list \
           (patient_id, dentist_id, procedure, preferred_dates, priority, status, notes, created_by) \
         VALUES ($1, $2, $3, $4, $5, 'waiting', $6, $7) \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(&payload.procedure)
    .bind(&payload.preferred_dates)
    .bind(priority)
    .bind(&payload.notes)
    .bind(ctx.auth.user_id())
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "waiting_list",
            Some(entry.id),
        ),
    );
    Ok(HttpResponse::Created().json(entry))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<WaitingEntryPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let id = path.into_inner();

    let entry = sqlx::query_as::<_, WaitingListEntry>(
        "UPDATE waiting_list SET \
           patient_id = $1, dentist_id = $2, procedure = $3, preferred_dates = $4, \
           priority = coalesce($5, priority), notes = $6, updated_at = now() \
         WHERE id = $7 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(&payload.procedure)
    .bind(&payload.preferred_dates)
    .bind(&payload.priority)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("waiting list entry"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "waiting_list", Some(id)),
    );
    Ok(HttpResponse::Ok().json(entry))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result = sqlx::query(
        "UPDATE waiting_list SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(ctx.db.conn())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("waiting list entry"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "waiting_list", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

/// Mark the entry as contacted.
pub async fn contact(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let entry = fetch(&mut ctx, id).await?;
    if entry.status == waiting_status::SCHEDULED || entry.status == waiting_status::CANCELLED {
        return Err(ApiError::Conflict(format!(
            "cannot contact a {} entry",
            entry.status
        )));
    }

    let entry = sqlx::query_as::<_, WaitingListEntry>(
        "UPDATE waiting_list SET \
           status = 'contacted', contacted_at = now(), contacted_by = $1, updated_at = now() \
         WHERE id = $2 \
         RETURNING *",
    )
    .bind(ctx.auth.user_id())
    .bind(id)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "waiting_list", Some(id))
            .with_details(json!({ "status": "contacted" })),
    );
    Ok(HttpResponse::Ok().json(entry))
}

/// Create the appointment and close the entry in one transaction.
pub async fn schedule(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<SchedulePayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    if payload.end_time <= payload.start_time {
        return Err(ApiError::validation("end_time must be after start_time"));
    }
    let id = path.into_inner();

    let entry = fetch(&mut ctx, id).await?;
    if entry.status == waiting_status::SCHEDULED {
        return Err(ApiError::Conflict("entry is already scheduled".into()));
    }

    let mut tx = ctx.db.conn().begin().await?;

    let appointment = sqlx::query_as::<_, Appointment>(
        "INSERT INTO appointments \
           (patient_id, dentist_id, start_time, end_time, procedure, status) \
         VALUES ($1, $2, $3, $4, $5, 'scheduled') \
         RETURNING *",
    )
    .bind(entry.patient_id)
    .bind(payload.dentist_id)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(payload.procedure.as_ref().or(entry.procedure.as_ref()))
    .fetch_one(&mut *tx)
    .await?;

    let entry = sqlx::query_as::<_, WaitingListEntry>(
        "UPDATE waiting_list SET \
           status = 'scheduled', scheduled_at = now(), appointment_id = $1, updated_at = now() \
         WHERE id = $2 \
         RETURNING *",
    )
    .bind(appointment.id)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "waiting_list", Some(id))
            .with_details(json!({ "appointment_id": appointment.id })),
    );
    Ok(HttpResponse::Ok().json(json!({ "entry": entry, "appointment": appointment })))
}

pub async fn stats(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, count(*) FROM waiting_list WHERE deleted_at IS NULL GROUP BY status",
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
