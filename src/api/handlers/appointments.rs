//! Appointment scheduling.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::{csv_response, Pagination};
use crate::audit::{self, AuditEntry};
use crate::documents::csv::export_appointments;
use crate::error::ApiError;
use crate::models::appointment::{status, Appointment, AppointmentListRow};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AppointmentListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub dentist_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppointmentPayload {
    pub patient_id: i64,
    pub dentist_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub kind: Option<String>,
    pub procedure: Option<String>,
    pub notes: Option<String>,
    pub room: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusPatch {
    pub status: String,
}

const LIST_SELECT: &str = "SELECT a.*, p.name AS patient_name, u.name AS dentist_name \
     FROM appointments a \
     JOIN patients p ON p.id = a.patient_id \
     JOIN public.users u ON u.id = a.dentist_id \
     WHERE a.deleted_at IS NULL \
       AND ($1::bigint IS NULL OR a.dentist_id = $1) \
       AND ($2::bigint IS NULL OR a.patient_id = $2) \
       AND ($3::text IS NULL OR a.status = $3) \
       AND ($4::timestamptz IS NULL OR a.start_time >= $4) \
       AND ($5::timestamptz IS NULL OR a.start_time < $5) \
     ORDER BY a.start_time";

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<AppointmentListQuery>,
) -> Result<HttpResponse, ApiError> {
    if let Some(s) = query.status.as_deref() {
        if !status::is_valid(s) {
            return Err(ApiError::validation(format!("unknown status: {s}")));
        }
    }

    let rows = sqlx::query_as::<_, AppointmentListRow>(&format!("{LIST_SELECT} LIMIT $6 OFFSET $7"))
        .bind(query.dentist_id)
        .bind(query.patient_id)
        .bind(&query.status)
        .bind(query.from)
        .bind(query.to)
        .bind(query.pagination.limit())
        .bind(query.pagination.offset())
        .fetch_all(ctx.db.conn())
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": rows })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let appointment = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Appointment, ApiError> {
    sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("appointment"))
}

fn validate_window(payload: &AppointmentPayload) -> Result<(), ApiError> {
    if payload.end_time <= payload.start_time {
        return Err(ApiError::validation("end_time must be after start_time"));
    }
    Ok(())
}

/// Rejects a slot that overlaps another non-cancelled appointment for the
/// same dentist.
async fn check_overlap(
    ctx: &mut TenantContext,
    payload: &AppointmentPayload,
    exclude_id: Option<i64>,
) -> Result<(), ApiError> {
    let conflict: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM appointments \
         WHERE deleted_at IS NULL \
           AND dentist_id = $1 \
           AND status NOT IN ('cancelled', 'no_show') \
           AND start_time < $3 AND end_time > $2 \
           AND ($4::bigint IS NULL OR id <> $4) \
         LIMIT 1",
    )
    .bind(payload.dentist_id)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(exclude_id)
    .fetch_optional(ctx.db.conn())
    .await?;

    match conflict {
        Some((id,)) => Err(ApiError::Conflict(format!(
            "dentist already has appointment {id} in this time slot"
        ))),
        None => Ok(()),
    }
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<AppointmentPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    validate_window(&payload)?;
    check_overlap(&mut ctx, &payload, None).await?;

    let appointment = sqlx::query_as::<_, Appointment>(
        "INSERT INTO appointments \
           (patient_id, dentist_id, start_time, end_time, kind, procedure, notes, room, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'scheduled') \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(&payload.kind)
    .bind(&payload.procedure)
    .bind(&payload.notes)
    .bind(&payload.room)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "appointment",
            Some(appointment.id),
        ),
    );
    Ok(HttpResponse::Created().json(appointment))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<AppointmentPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    validate_window(&payload)?;
    let id = path.into_inner();
    check_overlap(&mut ctx, &payload, Some(id)).await?;

    let appointment = sqlx::query_as::<_, Appointment>(
        "UPDATE appointments SET \
           patient_id = $1, dentist_id = $2, start_time = $3, end_time = $4, \
           kind = $5, procedure = $6, notes = $7, room = $8, updated_at = now() \
         WHERE id = $9 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(&payload.kind)
    .bind(&payload.procedure)
    .bind(&payload.notes)
    .bind(&payload.room)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("appointment"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "appointment", Some(id)),
    );
    Ok(HttpResponse::Ok().json(appointment))
}

pub async fn set_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<StatusPatch>,
) -> Result<HttpResponse, ApiError> {
    if !status::is_valid(&payload.status) {
        return Err(ApiError::validation(format!("unknown status: {}", payload.status)));
    }
    let id = path.into_inner();

    let appointment = sqlx::query_as::<_, Appointment>(
        "UPDATE appointments SET \
           status = $1, \
           confirmed = (confirmed OR $1 = 'confirmed'), \
           confirmed_at = CASE WHEN $1 = 'confirmed' AND confirmed_at IS NULL \
                               THEN now() ELSE confirmed_at END, \
           updated_at = now() \
         WHERE id = $2 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.status)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("appointment"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "appointment", Some(id))
            .with_details(json!({ "status": payload.status })),
    );
    Ok(HttpResponse::Ok().json(appointment))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result = sqlx::query(
        "UPDATE appointments SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(ctx.db.conn())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("appointment"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "appointment", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

pub async fn export_csv(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    query: web::Query<AppointmentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let rows = sqlx::query_as::<_, AppointmentListRow>(LIST_SELECT)
        .bind(query.dentist_id)
        .bind(query.patient_id)
        .bind(&query.status)
        .bind(query.from)
        .bind(query.to)
        .fetch_all(ctx.db.conn())
        .await?;

    let bytes = export_appointments(&rows)?;
    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "appointment", None),
    );
    Ok(csv_response(bytes, "appointments.csv"))
}
