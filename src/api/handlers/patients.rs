//! Patient CRUD, search and CSV import/export.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::{csv_response, Pagination};
use crate::audit::{self, AuditEntry};
use crate::documents::csv::{export_patients, parse_patients, ImportReport};
use crate::error::ApiError;
use crate::models::Patient;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PatientListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    /// Matches name, CPF or phone.
    pub search: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PatientPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,

    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cell_phone: Option<String>,

    pub address: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,

    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub systemic_diseases: Option<String>,
    pub blood_type: Option<String>,

    #[serde(default)]
    pub has_insurance: bool,
    pub insurance_name: Option<String>,
    pub insurance_number: Option<String>,

    pub tags: Option<String>,
    pub notes: Option<String>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<PatientListQuery>,
) -> Result<HttpResponse, ApiError> {
    let search = query
        .search
        .as_deref()
        .map(|s| format!("%{}%", s.trim()));

    let patients = sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients \
         WHERE deleted_at IS NULL \
           AND ($1::text IS NULL OR name ILIKE $1 OR cpf ILIKE $1 \
                OR phone ILIKE $1 OR cell_phone ILIKE $1) \
           AND ($2::boolean IS NULL OR active = $2) \
         ORDER BY name \
         LIMIT $3 OFFSET $4",
    )
    .bind(&search)
    .bind(query.active)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    let total: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM patients \
         WHERE deleted_at IS NULL \
           AND ($1::text IS NULL OR name ILIKE $1 OR cpf ILIKE $1 \
                OR phone ILIKE $1 OR cell_phone ILIKE $1) \
           AND ($2::boolean IS NULL OR active = $2)",
    )
    .bind(&search)
    .bind(query.active)
    .fetch_one(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": patients, "total": total.0 })))
}

pub async fn get(
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let patient = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(patient))
}

pub(crate) async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Patient, ApiError> {
    sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(ctx.db.conn())
        .await?
        .ok_or(ApiError::NotFound("patient"))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<PatientPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    if let Some(cpf) = payload.cpf.as_deref().filter(|c| !c.is_empty()) {
        let dup: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM patients WHERE cpf = $1 AND deleted_at IS NULL")
                .bind(cpf)
                .fetch_optional(ctx.db.conn())
                .await?;
        if dup.is_some() {
            return Err(ApiError::Conflict("a patient with this CPF already exists".into()));
        }
    }

    let patient = sqlx::query_as::<_, Patient>(
        "INSERT INTO patients \
           (name, cpf, rg, birth_date, gender, email, phone, cell_phone, \
            address, number, complement, district, city, state, zip_code, \
            allergies, medications, systemic_diseases, blood_type, \
            has_insurance, insurance_name, insurance_number, tags, notes, active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                 $16, $17, $18, $19, $20, $21, $22, $23, $24, TRUE) \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.cpf)
    .bind(&payload.rg)
    .bind(payload.birth_date)
    .bind(&payload.gender)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.cell_phone)
    .bind(&payload.address)
    .bind(&payload.number)
    .bind(&payload.complement)
    .bind(&payload.district)
    .bind(&payload.city)
    .bind(&payload.state)
    .bind(&payload.zip_code)
    .bind(&payload.allergies)
    .bind(&payload.medications)
    .bind(&payload.systemic_diseases)
    .bind(&payload.blood_type)
    .bind(payload.has_insurance)
    .bind(&payload.insurance_name)
    .bind(&payload.insurance_number)
    .bind(&payload.tags)
    .bind(&payload.notes)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "patient", Some(patient.id)),
    );
    Ok(HttpResponse::Created().json(patient))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<PatientPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let id = path.into_inner();

    let patient = sqlx::query_as::<_, Patient>(
        "UPDATE patients SET \
           name = $1, cpf = $2, rg = $3, birth_date = $4, gender = $5, \
           email = $6, phone = $7, cell_phone = $8, \
           address = $9, number = $10, complement = $11, district = $12, \
           city = $13, state = $14, zip_code = $15, \
           allergies = $16, medications = $17, systemic_diseases = $18, blood_type = $19, \
           has_insurance = $20, insurance_name = $21, insurance_number = $22, \
           tags = $23, notes = $24, updated_at = now() \
         WHERE id = $25 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.cpf)
    .bind(&payload.rg)
    .bind(payload.birth_date)
    .bind(&payload.gender)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.cell_phone)
    .bind(&payload.address)
    .bind(&payload.number)
    .bind(&payload.complement)
    .bind(&payload.district)
    .bind(&payload.city)
    .bind(&payload.state)
    .bind(&payload.zip_code)
    .bind(&payload.allergies)
    .bind(&payload.medications)
    .bind(&payload.systemic_diseases)
    .bind(&payload.blood_type)
    .bind(payload.has_insurance)
    .bind(&payload.insurance_name)
    .bind(&payload.insurance_number)
    .bind(&payload.tags)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("patient"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "patient", Some(id)),
    );
    Ok(HttpResponse::Ok().json(patient))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result = sqlx::query(
        "UPDATE patients SET deleted_at = now(), active = FALSE \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(ctx.db.conn())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("patient"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "patient", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

pub async fn export_csv(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
) -> Result<HttpResponse, ApiError> {
    let patients = sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients WHERE deleted_at IS NULL ORDER BY name",
    )
    .fetch_all(ctx.db.conn())
    .await?;

    let bytes = export_patients(&patients)?;
    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "patient", None),
    );
    Ok(csv_response(bytes, "patients.csv"))
}

/// CSV body import. Rows with errors are reported and skipped; duplicates by
/// CPF are skipped without counting as errors.
pub async fn import_csv(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let outcome = parse_patients(&body)?;

    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut errors = outcome.errors;

    for row in outcome.rows {
        if let Some(cpf) = row.cpf.as_deref() {
            let dup: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM patients WHERE cpf = $1 AND deleted_at IS NULL")
                    .bind(cpf)
                    .fetch_optional(ctx.db.conn())
                    .await?;
            if dup.is_some() {
                skipped += 1;
                continue;
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO patients (name, cpf, email, phone, cell_phone, birth_date, city, state, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)",
        )
        .bind(&row.name)
        .bind(&row.cpf)
        .bind(&row.email)
        .bind(&row.phone)
        .bind(&row.cell_phone)
        .bind(row.birth_date)
        .bind(&row.city)
        .bind(&row.state)
        .execute(ctx.db.conn())
        .await;

        match inserted {
            Ok(_) => imported += 1,
            Err(err) => errors.push(format!("{}: {err}", row.name)),
        }
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "patient_import", None)
            .with_details(json!({ "imported": imported, "skipped": skipped })),
    );
    Ok(HttpResponse::Ok().json(ImportReport { imported, skipped, errors }))
}
