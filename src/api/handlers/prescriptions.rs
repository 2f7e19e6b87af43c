//! Prescriptions, reports, certificates and referrals issued to patients.
//!
//! Lifecycle: draft -> issued -> (optionally signed, printed). Issued
//! documents refuse edits; cancellation is the only way out.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::medical_records::{open_certificate, SignRequest};
use crate::api::handlers::{patients, pdf_response, Pagination};
use crate::audit::{self, AuditEntry};
use crate::documents::pdf::prescription_pdf;
use crate::error::ApiError;
use crate::models::clinical::{prescription_kind, prescription_status, Prescription};
use crate::models::user::role;
use crate::models::User;
use crate::signing;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PrescriptionListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub patient_id: Option<i64>,
    pub kind: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PrescriptionPayload {
    pub patient_id: i64,
    #[validate(length(min = 1))]
    pub kind: String,
    pub title: Option<String>,
    pub medications: Option<String>,
    #[validate(length(min = 1))]
    pub content: String,
    pub diagnosis: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub prescription_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<PrescriptionListQuery>,
) -> Result<HttpResponse, ApiError> {
    let prescriptions = sqlx::query_as::<_, Prescription>(
        "SELECT * FROM prescriptions \
         WHERE deleted_at IS NULL \
           AND ($1::bigint IS NULL OR patient_id = $1) \
           AND ($2::text IS NULL OR kind = $2) \
           AND ($3::text IS NULL OR status = $3) \
         ORDER BY created_at DESC \
         LIMIT $4 OFFSET $5",
    )
    .bind(query.patient_id)
    .bind(&query.kind)
    .bind(&query.status)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": prescriptions })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let prescription = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(prescription))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Prescription, ApiError> {
    sqlx::query_as::<_, Prescription>(
        "SELECT * FROM prescriptions WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("prescription"))
}

fn ensure_editable(prescription: &Prescription) -> Result<(), ApiError> {
    if prescription.is_signed {
        return Err(ApiError::Conflict("a signed document cannot be modified".into()));
    }
    if prescription.status == prescription_status::ISSUED {
        return Err(ApiError::Conflict("an issued document cannot be modified".into()));
    }
    Ok(())
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<PrescriptionPayload>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[role::DENTIST])?;
    payload.validate()?;
    if !prescription_kind::is_valid(&payload.kind) {
        return Err(ApiError::validation(format!("unknown document kind: {}", payload.kind)));
    }

    // Snapshot clinic and dentist identification at creation time.
    let dentist = sqlx::query_as::<_, User>("SELECT * FROM public.users WHERE id = $1")
        .bind(ctx.auth.user_id())
        .fetch_one(state.db.pool())
        .await?;
    let clinic: (String,) = sqlx::query_as("SELECT name FROM public.tenants WHERE id = $1")
        .bind(ctx.auth.tenant_id())
        .fetch_one(state.db.pool())
        .await?;

    let prescription = sqlx::query_as::<_, Prescription>(
        "INSERT INTO prescriptions \
           (patient_id, dentist_id, kind, title, medications, content, diagnosis, \
            valid_until, prescription_date, notes, clinic_name, dentist_name, dentist_cro, \
            status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'draft') \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(dentist.id)
    .bind(&payload.kind)
    .bind(&payload.title)
    .bind(&payload.medications)
    .bind(&payload.content)
    .bind(&payload.diagnosis)
    .bind(payload.valid_until)
    .bind(payload.prescription_date)
    .bind(&payload.notes)
    .bind(&clinic.0)
    .bind(&dentist.name)
    .bind(&dentist.cro)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "prescription",
            Some(prescription.id),
        ),
    );
    Ok(HttpResponse::Created().json(prescription))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<PrescriptionPayload>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[role::DENTIST])?;
    payload.validate()?;
    let id = path.into_inner();

    let existing = fetch(&mut ctx, id).await?;
    ensure_editable(&existing)?;

    let prescription = sqlx::query_as::<_, Prescription>(
        "UPDATE prescriptions SET \
           patient_id = $1, kind = $2, title = $3, medications = $4, content = $5, \
           diagnosis = $6, valid_until = $7, prescription_date = $8, notes = $9, \
           updated_at = now() \
         WHERE id = $10 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(&payload.kind)
    .bind(&payload.title)
    .bind(&payload.medications)
    .bind(&payload.content)
    .bind(&payload.diagnosis)
    .bind(payload.valid_until)
    .bind(payload.prescription_date)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("prescription"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "prescription", Some(id)),
    );
    Ok(HttpResponse::Ok().json(prescription))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[role::DENTIST])?;
    let id = path.into_inner();

    let existing = fetch(&mut ctx, id).await?;
    if existing.is_signed {
        return Err(ApiError::Conflict("a signed document cannot be deleted".into()));
    }

    sqlx::query("UPDATE prescriptions SET deleted_at = now() WHERE id = $1")
        .bind(id)
        .execute(ctx.db.conn())
        .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "prescription", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

/// Transition draft -> issued.
pub async fn issue(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[role::DENTIST])?;
    let id = path.into_inner();

    let existing = fetch(&mut ctx, id).await?;
    if existing.status != prescription_status::DRAFT {
        return Err(ApiError::Conflict(format!(
            "only drafts can be issued, current status is {}",
            existing.status
        )));
    }

    let prescription = sqlx::query_as::<_, Prescription>(
        "UPDATE prescriptions SET status = 'issued', issued_at = now(), updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "prescription", Some(id))
            .with_details(json!({ "status": "issued" })),
    );
    Ok(HttpResponse::Ok().json(prescription))
}

/// Render the PDF and bump the print counter.
pub async fn print(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let prescription = sqlx::query_as::<_, Prescription>(
        "UPDATE prescriptions \
         SET printed_at = now(), print_count = print_count + 1, updated_at = now() \
         WHERE id = $1 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("prescription"))?;

    let patient = patients::fetch(&mut ctx, prescription.patient_id).await?;
    let bytes = prescription_pdf(&prescription, &patient)?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "prescription", Some(id)),
    );
    Ok(pdf_response(bytes, &format!("document_{id}.pdf")))
}

/// PDF without touching the print counter (preview).
pub async fn pdf(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let prescription = fetch(&mut ctx, path.into_inner()).await?;
    let patient = patients::fetch(&mut ctx, prescription.patient_id).await?;
    let bytes = prescription_pdf(&prescription, &patient)?;
    Ok(pdf_response(bytes, &format!("document_{}.pdf", prescription.id)))
}

pub async fn sign(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<SignRequest>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[role::DENTIST])?;
    payload.validate()?;
    let id = path.into_inner();

    let prescription = fetch(&mut ctx, id).await?;
    if prescription.is_signed {
        return Err(ApiError::Conflict("document is already signed".into()));
    }

    let (certificate, private_key_der) =
        open_certificate(&state, ctx.auth.user_id(), &payload).await?;

    let content = signing::prescription_content(&prescription);
    let bundle = signing::sign_content(&private_key_der, &content)?;

    let prescription = sqlx::query_as::<_, Prescription>(
        "UPDATE prescriptions SET \
           is_signed = TRUE, signed_at = now(), signed_by_id = $1, \
           certificate_thumbprint = $2, signature_hash = $3, signature = $4, \
           updated_at = now() \
         WHERE id = $5 \
         RETURNING *",
    )
    .bind(ctx.auth.user_id())
    .bind(&certificate.thumbprint)
    .bind(&bundle.content_hash)
    .bind(&bundle.signature)
    .bind(id)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::SIGN, "prescription", Some(id))
            .with_details(json!({ "thumbprint": certificate.thumbprint })),
    );
    Ok(HttpResponse::Ok().json(prescription))
}
