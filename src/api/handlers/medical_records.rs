//! Medical records: CRUD plus digital signing. A signed record is immutable.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::Pagination;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::user::role;
use crate::models::{MedicalRecord, User, UserCertificate};
use crate::signing;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecordListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub patient_id: Option<i64>,
    pub dentist_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPayload {
    pub patient_id: i64,
    pub dentist_id: i64,
    pub appointment_id: Option<i64>,
    pub kind: Option<String>,
    pub odontogram: Option<serde_json::Value>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub procedure_done: Option<String>,
    pub materials: Option<String>,
    pub evolution: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignRequest {
    /// Defaults to the caller's active certificate.
    pub certificate_id: Option<i64>,
    #[validate(length(min = 1))]
    pub password: String,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<RecordListQuery>,
) -> Result<HttpResponse, ApiError> {
    let records = sqlx::query_as::<_, MedicalRecord>(
        "SELECT * FROM medical_records \
         WHERE deleted_at IS NULL \
           AND ($1::bigint IS NULL OR patient_id = $1) \
           AND ($2::bigint IS NULL OR dentist_id = $2) \
         ORDER BY created_at DESC \
         LIMIT $3 OFFSET $4",
    )
    .bind(query.patient_id)
    .bind(query.dentist_id)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": records })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let record = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(record))
}

pub(crate) async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<MedicalRecord, ApiError> {
    sqlx::query_as::<_, MedicalRecord>(
        "SELECT * FROM medical_records WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("medical record"))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<RecordPayload>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[role::DENTIST])?;
    payload.validate()?;

    let record = sqlx::query_as::<_, MedicalRecord>(
        "INSERT INTO medical_records \
           (patient_id, dentist_id, appointment_id, kind, odontogram, diagnosis, \
            treatment_plan, procedure_done, materials, evolution, notes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(payload.appointment_id)
    .bind(&payload.kind)
    .bind(&payload.odontogram)
    .bind(&payload.diagnosis)
    .bind(&payload.treatment_plan)
    .bind(&payload.procedure_done)
    .bind(&payload.materials)
    .bind(&payload.evolution)
    .bind(&payload.notes)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "medical_record",
            Some(record.id),
        ),
    );
    Ok(HttpResponse::Created().json(record))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<RecordPayload>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[role::DENTIST])?;
    payload.validate()?;
    let id = path.into_inner();

    let existing = fetch(&mut ctx, id).await?;
    if existing.is_signed {
        return Err(ApiError::Conflict("a signed record cannot be modified".into()));
    }

    let record = sqlx::query_as::<_, MedicalRecord>(
        "UPDATE medical_records SET \
           patient_id = $1, dentist_id = $2, appointment_id = $3, kind = $4, \
           odontogram = $5, diagnosis = $6, treatment_plan = $7, procedure_done = $8, \
           materials = $9, evolution = $10, notes = $11, updated_at = now() \
         WHERE id = $12 AND deleted_at IS NULL AND NOT is_signed \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(payload.appointment_id)
    .bind(&payload.kind)
    .bind(&payload.odontogram)
    .bind(&payload.diagnosis)
    .bind(&payload.treatment_plan)
    .bind(&payload.procedure_done)
    .bind(&payload.materials)
    .bind(&payload.evolution)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("medical record"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "medical_record", Some(id)),
    );
    Ok(HttpResponse::Ok().json(record))
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
        return Err(ApiError::Conflict("a signed record cannot be deleted".into()));
    }

    sqlx::query("UPDATE medical_records SET deleted_at = now() WHERE id = $1")
        .bind(id)
        .execute(ctx.db.conn())
        .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "medical_record", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

/// Load the signing certificate and open its private key with the supplied
/// password. Shared by record and prescription signing.
pub(crate) async fn open_certificate(
    state: &AppState,
    user_id: i64,
    request: &SignRequest,
) -> Result<(UserCertificate, Vec<u8>), ApiError> {
    let certificate = match request.certificate_id {
        Some(id) => sqlx::query_as::<_, UserCertificate>(
            "SELECT * FROM public.user_certificates \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(state.db.pool())
        .await?,
        None => sqlx::query_as::<_, UserCertificate>(
            "SELECT * FROM public.user_certificates \
             WHERE user_id = $1 AND active AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(state.db.pool())
        .await?,
    }
    .ok_or(ApiError::NotFound("certificate"))?;

    let now = Utc::now();
    if certificate.is_expired(now) {
        return Err(ApiError::validation("certificate has expired"));
    }
    if certificate.is_not_yet_valid(now) {
        return Err(ApiError::validation("certificate is not yet valid"));
    }

    let key = signing::derive_key(&request.password, &certificate.encryption_salt);
    let pfx_bytes = signing::decrypt(&key, &certificate.encrypted_pfx)?;
    let parsed = signing::parse_pfx(&pfx_bytes, &request.password)?;

    sqlx::query("UPDATE public.user_certificates SET last_used_at = now() WHERE id = $1")
        .bind(certificate.id)
        .execute(state.db.pool())
        .await?;

    Ok((certificate, parsed.private_key_der))
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

    let record = fetch(&mut ctx, id).await?;
    if record.is_signed {
        return Err(ApiError::Conflict("record is already signed".into()));
    }

    let signer = sqlx::query_as::<_, User>("SELECT * FROM public.users WHERE id = $1")
        .bind(ctx.auth.user_id())
        .fetch_one(state.db.pool())
        .await?;

    let (certificate, private_key_der) =
        open_certificate(&state, ctx.auth.user_id(), &payload).await?;

    let content = signing::medical_record_content(&record);
    let bundle = signing::sign_content(&private_key_der, &content)?;

    let record = sqlx::query_as::<_, MedicalRecord>(
        "UPDATE medical_records SET \
           is_signed = TRUE, signed_at = now(), signed_by_id = $1, signed_by_name = $2, \
           signed_by_cro = $3, certificate_thumbprint = $4, signature_hash = $5, \
           signature = $6, updated_at = now() \
         WHERE id = $7 \
         RETURNING *",
    )
    .bind(signer.id)
    .bind(&signer.name)
    .bind(&signer.cro)
    .bind(&certificate.thumbprint)
    .bind(&bundle.content_hash)
    .bind(&bundle.signature)
    .bind(id)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::SIGN, "medical_record", Some(id))
            .with_details(json!({ "thumbprint": certificate.thumbprint })),
    );
    Ok(HttpResponse::Ok().json(record))
}
