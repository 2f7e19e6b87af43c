//! PKCS#12 certificate management and signature verification.
//!
//! The uploaded bundle is stored AES-256-GCM encrypted under a key derived
//! from the certificate password; only the certificate DER (public material)
//! is kept in clear so signatures can be verified later without the password.

use actix_multipart::form::tempfile::TempFile;
use actix_multipart::form::text::Text;
use actix_multipart::form::MultipartForm;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::{MedicalRecord, Prescription, UserCertificate};
use crate::signing;
use crate::state::AppState;

const MAX_PFX_SIZE: usize = 1024 * 1024;

#[derive(Debug, MultipartForm)]
pub struct CertificateUploadForm {
    #[multipart(limit = "1MB")]
    pub file: TempFile,
    /// Display name, defaults to the file name.
    pub name: Option<Text<String>>,
    pub password: Text<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordCheck {
    #[validate(length(min = 1))]
    pub password: String,
}

pub async fn list(state: web::Data<AppState>, ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    let certificates = sqlx::query_as::<_, UserCertificate>(
        "SELECT * FROM public.user_certificates \
         WHERE user_id = $1 AND deleted_at IS NULL \
         ORDER BY created_at DESC",
    )
    .bind(ctx.auth.user_id())
    .fetch_all(state.db.pool())
    .await?;

    let now = Utc::now();
    let data: Vec<_> = certificates
        .iter()
        .map(|cert| {
            let mut value = serde_json::to_value(cert).unwrap_or_default();
            value["expired"] = json!(cert.is_expired(now));
            value["days_until_expiry"] = json!(cert.days_until_expiry(now));
            value
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}

pub async fn upload(
    state: web::Data<AppState>,
    req: HttpRequest,
    ctx: TenantContext,
    MultipartForm(form): MultipartForm<CertificateUploadForm>,
) -> Result<HttpResponse, ApiError> {
    if form.file.size == 0 || form.file.size > MAX_PFX_SIZE {
        return Err(ApiError::validation("certificate file must be between 1 byte and 1 MB"));
    }

    let pfx_bytes = tokio::fs::read(form.file.file.path())
        .await
        .map_err(|e| ApiError::internal(format!("upload spool read: {e}")))?;

    // Validates the password and that the bundle holds an RSA key.
    let parsed = signing::parse_pfx(&pfx_bytes, &form.password.0)?;
    let metadata = parsed.metadata;

    let now = Utc::now();
    if now > metadata.not_after {
        return Err(ApiError::validation("certificate has already expired"));
    }

    let salt = signing::generate_salt();
    let key = signing::derive_key(&form.password.0, &salt);
    let encrypted_pfx = signing::encrypt(&key, &pfx_bytes)?;

    let name = form
        .name
        .map(|t| t.0)
        .or_else(|| form.file.file_name.clone())
        .unwrap_or_else(|| "certificado".to_string());

    let user_id = ctx.auth.user_id();
    let duplicate: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM public.user_certificates \
         WHERE user_id = $1 AND thumbprint = $2 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .bind(&metadata.thumbprint)
    .fetch_optional(state.db.pool())
    .await?;
    if let Some((id,)) = duplicate {
        return Err(ApiError::Conflict(format!(
            "this certificate is already registered (id {id})"
        )));
    }

    // First certificate becomes active right away.
    let (existing,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM public.user_certificates \
         WHERE user_id = $1 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(state.db.pool())
    .await?;

    let certificate = sqlx::query_as::<_, UserCertificate>(
        "INSERT INTO public.user_certificates \
           (user_id, name, subject_cn, issuer_cn, serial_number, thumbprint, \
            not_before, not_after, encrypted_pfx, encryption_salt, certificate_der, active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING *",
    )
    .bind(user_id)
    .bind(&name)
    .bind(&metadata.subject_cn)
    .bind(&metadata.issuer_cn)
    .bind(&metadata.serial_number)
    .bind(&metadata.thumbprint)
    .bind(metadata.not_before)
    .bind(metadata.not_after)
    .bind(&encrypted_pfx)
    .bind(salt.as_slice())
    .bind(&parsed.certificate_der)
    .bind(existing == 0)
    .fetch_one(state.db.pool())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "certificate",
            Some(certificate.id),
        )
        .with_details(json!({ "thumbprint": metadata.thumbprint })),
    );
    Ok(HttpResponse::Created().json(certificate))
}

async fn fetch_owned(
    state: &AppState,
    user_id: i64,
    id: i64,
) -> Result<UserCertificate, ApiError> {
    sqlx::query_as::<_, UserCertificate>(
        "SELECT * FROM public.user_certificates \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(ApiError::NotFound("certificate"))
}

/// Make the certificate the caller's active one; any other active
/// certificate is deactivated.
pub async fn activate(
    state: web::Data<AppState>,
    req: HttpRequest,
    ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let user_id = ctx.auth.user_id();
    let certificate = fetch_owned(&state, user_id, id).await?;
    if certificate.is_expired(Utc::now()) {
        return Err(ApiError::validation("certificate has expired"));
    }

    use sqlx::Connection;
    let mut conn = state.db.pool().acquire().await?;
    let mut tx = conn.begin().await?;
    sqlx::query(
        "UPDATE public.user_certificates SET active = FALSE, updated_at = now() \
         WHERE user_id = $1 AND active",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    let certificate = sqlx::query_as::<_, UserCertificate>(
        "UPDATE public.user_certificates SET active = TRUE, updated_at = now() \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "certificate", Some(id))
            .with_details(json!({ "active": true })),
    );
    Ok(HttpResponse::Ok().json(certificate))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    fetch_owned(&state, ctx.auth.user_id(), id).await?;

    sqlx::query(
        "UPDATE public.user_certificates \
         SET deleted_at = now(), active = FALSE, updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .execute(state.db.pool())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "certificate", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

/// Check that a password opens the certificate without signing anything.
pub async fn validate_password(
    state: web::Data<AppState>,
    ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<PasswordCheck>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let certificate = fetch_owned(&state, ctx.auth.user_id(), path.into_inner()).await?;

    let key = signing::derive_key(&payload.password, &certificate.encryption_salt);
    let valid = signing::decrypt(&key, &certificate.encrypted_pfx).is_ok();
    Ok(HttpResponse::Ok().json(json!({ "valid": valid })))
}

struct SignedDocument {
    content: String,
    is_signed: bool,
    thumbprint: Option<String>,
    signature_hash: Option<String>,
    signature: Option<String>,
    signed_by_name: Option<String>,
    signed_at: Option<chrono::DateTime<Utc>>,
}

/// Recompute the canonical content and check the stored signature.
pub async fn verify_document(
    state: web::Data<AppState>,
    mut ctx: TenantContext,
    path: web::Path<(String, i64)>,
) -> Result<HttpResponse, ApiError> {
    let (doc_type, id) = path.into_inner();

    let doc = match doc_type.as_str() {
        "medical_record" => {
            let record = sqlx::query_as::<_, MedicalRecord>(
                "SELECT * FROM medical_records WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id)
            .fetch_optional(ctx.db.conn())
            .await?
            .ok_or(ApiError::NotFound("medical record"))?;
            SignedDocument {
                content: signing::medical_record_content(&record),
                is_signed: record.is_signed,
                thumbprint: record.certificate_thumbprint,
                signature_hash: record.signature_hash,
                signature: record.signature,
                signed_by_name: record.signed_by_name,
                signed_at: record.signed_at,
            }
        }
        "prescription" => {
            let prescription = sqlx::query_as::<_, Prescription>(
                "SELECT * FROM prescriptions WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id)
            .fetch_optional(ctx.db.conn())
            .await?
            .ok_or(ApiError::NotFound("prescription"))?;
            SignedDocument {
                content: signing::prescription_content(&prescription),
                is_signed: prescription.is_signed,
                thumbprint: prescription.certificate_thumbprint,
                signature_hash: prescription.signature_hash,
                signature: prescription.signature,
                signed_by_name: prescription.dentist_name,
                signed_at: prescription.signed_at,
            }
        }
        other => {
            return Err(ApiError::validation(format!("unknown document type: {other}")));
        }
    };

    if !doc.is_signed {
        return Ok(HttpResponse::Ok().json(json!({ "signed": false, "valid": false })));
    }
    let (Some(thumbprint), Some(signature)) = (&doc.thumbprint, &doc.signature) else {
        return Ok(HttpResponse::Ok().json(json!({
            "signed": true,
            "valid": false,
            "reason": "signature data is incomplete",
        })));
    };

    let certificate = sqlx::query_as::<_, UserCertificate>(
        "SELECT * FROM public.user_certificates WHERE thumbprint = $1",
    )
    .bind(thumbprint)
    .fetch_optional(state.db.pool())
    .await?;
    let Some(certificate) = certificate else {
        return Ok(HttpResponse::Ok().json(json!({
            "signed": true,
            "valid": false,
            "reason": "signing certificate is no longer registered",
        })));
    };

    let expected_hash = signing::content_hash(&doc.content);
    let hash_matches = doc.signature_hash.as_deref() == Some(expected_hash.as_str());
    let signature_valid =
        signing::verify_signature(&certificate.certificate_der, &doc.content, signature)?;

    Ok(HttpResponse::Ok().json(json!({
        "signed": true,
        "valid": hash_matches && signature_valid,
        "hash_matches": hash_matches,
        "signature_valid": signature_valid,
        "signed_by": doc.signed_by_name,
        "signed_at": doc.signed_at,
        "certificate": {
            "subject_cn": certificate.subject_cn,
            "thumbprint": certificate.thumbprint,
            "not_after": certificate.not_after,
        },
    })))
}
