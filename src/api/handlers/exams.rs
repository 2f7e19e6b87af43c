//! Patient exam files. Binary content lives in S3; only metadata is stored
//! in the tenant schema. Downloads go through presigned URLs.

use actix_multipart::form::tempfile::TempFile;
use actix_multipart::form::text::Text;
use actix_multipart::form::MultipartForm;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::api::extract::TenantContext;
use crate::api::handlers::{patients, Pagination};
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::Exam;
use crate::state::AppState;

#[derive(Debug, MultipartForm)]
pub struct ExamUploadForm {
    #[multipart(limit = "25MB")]
    pub file: TempFile,
    pub patient_id: Text<i64>,
    pub name: Text<String>,
    pub description: Option<Text<String>>,
    pub exam_type: Option<Text<String>>,
    /// ISO date.
    pub exam_date: Option<Text<String>>,
    pub notes: Option<Text<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ExamListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub patient_id: Option<i64>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<ExamListQuery>,
) -> Result<HttpResponse, ApiError> {
    let exams = sqlx::query_as::<_, Exam>(
        "SELECT * FROM exams \
         WHERE deleted_at IS NULL \
           AND ($1::bigint IS NULL OR patient_id = $1) \
         ORDER BY coalesce(exam_date, created_at::date) DESC, id DESC \
         LIMIT $2 OFFSET $3",
    )
    .bind(query.patient_id)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": exams })))
}

pub async fn upload(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    MultipartForm(form): MultipartForm<ExamUploadForm>,
) -> Result<HttpResponse, ApiError> {
    let patient = patients::fetch(&mut ctx, form.patient_id.0).await?;

    let exam_date = match form.exam_date.as_deref() {
        Some(raw) => Some(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| ApiError::validation(format!("invalid exam_date: {raw}")))?,
        ),
        None => None,
    };

    let file_name = form
        .file
        .file_name
        .clone()
        .unwrap_or_else(|| "exam.bin".to_string());
    let content_type = form.file.content_type.as_ref().map(|m| m.to_string());
    let file_size = form.file.size as i64;

    let bytes = tokio::fs::read(form.file.file.path())
        .await
        .map_err(|e| ApiError::internal(format!("upload spool read: {e}")))?;

    let patient_ref = patient.cpf.as_deref().unwrap_or(&patient.name);
    let key = state.storage.object_key(patient_ref, &file_name);
    state
        .storage
        .upload(&key, bytes, content_type.as_deref())
        .await?;

    let inserted = sqlx::query_as::<_, Exam>(
        "INSERT INTO exams \
           (patient_id, name, description, exam_type, exam_date, s3_key, file_name, \
            file_type, file_size, uploaded_by_id, notes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(patient.id)
    .bind(&form.name.0)
    .bind(form.description.as_ref().map(|t| t.0.clone()))
    .bind(form.exam_type.as_ref().map(|t| t.0.clone()))
    .bind(exam_date)
    .bind(&key)
    .bind(&file_name)
    .bind(&content_type)
    .bind(file_size)
    .bind(ctx.auth.user_id())
    .bind(form.notes.as_ref().map(|t| t.0.clone()))
    .fetch_one(ctx.db.conn())
    .await;

    let exam = match inserted {
        Ok(exam) => exam,
        Err(err) => {
            // Keep storage and metadata consistent.
            let _ = state.storage.delete(&key).await;
            return Err(err.into());
        }
    };

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "exam", Some(exam.id)),
    );
    Ok(HttpResponse::Created().json(exam))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let exam = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(exam))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Exam, ApiError> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(ctx.db.conn())
        .await?
        .ok_or(ApiError::NotFound("exam"))
}

/// Short-lived presigned GET URL for the stored file.
pub async fn download_url(
    state: web::Data<AppState>,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let exam = fetch(&mut ctx, path.into_inner()).await?;
    let url = state.storage.presigned_download_url(&exam.s3_key).await?;
    Ok(HttpResponse::Ok().json(json!({
        "url": url,
        "file_name": exam.file_name,
        "file_type": exam.file_type,
    })))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let exam = fetch(&mut ctx, id).await?;

    state.storage.delete(&exam.s3_key).await?;
    sqlx::query("UPDATE exams SET deleted_at = now() WHERE id = $1")
        .bind(id)
        .execute(ctx.db.conn())
        .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "exam", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}
