//! Outbound WhatsApp messaging.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::Patient;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SendTemplateRequest {
    #[validate(length(min = 1))]
    pub to: String,
    #[validate(length(min = 1))]
    pub template: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

fn default_language() -> String {
    "pt_BR".to_string()
}

// TenantContext is only extracted to require a valid session.
pub async fn templates(
    state: web::Data<AppState>,
    _ctx: TenantContext,
) -> Result<HttpResponse, ApiError> {
    let templates = state.whatsapp.approved_templates().await?;
    Ok(HttpResponse::Ok().json(json!({ "data": templates })))
}

pub async fn send_template(
    state: web::Data<AppState>,
    req: HttpRequest,
    ctx: TenantContext,
    payload: web::Json<SendTemplateRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let response = state
        .whatsapp
        .send_template(&payload.to, &payload.template, &payload.language, &payload.parameters)
        .await?;
    let message_id = response.messages.first().map(|m| m.id.clone());

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "whatsapp_message", None)
            .with_details(json!({ "template": payload.template, "message_id": message_id })),
    );
    Ok(HttpResponse::Ok().json(json!({ "message_id": message_id })))
}

#[derive(sqlx::FromRow)]
struct ConfirmationRow {
    patient_id: i64,
    start_time: chrono::DateTime<chrono::Utc>,
    dentist_id: i64,
}

/// Send the appointment-confirmation template for a booked appointment.
pub async fn send_appointment_confirmation(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let appointment_id = path.into_inner();

    let appointment = sqlx::query_as::<_, ConfirmationRow>(
        "SELECT patient_id, start_time, dentist_id FROM appointments \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(appointment_id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("appointment"))?;

    let patient = sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(appointment.patient_id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("patient"))?;

    let phone = patient
        .cell_phone
        .as_deref()
        .or(patient.phone.as_deref())
        .ok_or_else(|| ApiError::validation("patient has no phone number"))?;

    let dentist: Option<(String,)> =
        sqlx::query_as("SELECT name FROM public.users WHERE id = $1")
            .bind(appointment.dentist_id)
            .fetch_optional(state.db.pool())
            .await?;
    let dentist_name = dentist.map(|(n,)| n).unwrap_or_default();

    let parameters = vec![
        patient.name.clone(),
        appointment.start_time.format("%d/%m/%Y").to_string(),
        appointment.start_time.format("%H:%M").to_string(),
        dentist_name,
    ];
    let response = state
        .whatsapp
        .send_template(phone, "appointment_confirmation", "pt_BR", &parameters)
        .await?;
    let message_id = response.messages.first().map(|m| m.id.clone());

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "whatsapp_message",
            Some(appointment_id),
        )
        .with_details(json!({ "template": "appointment_confirmation", "message_id": message_id })),
    );
    Ok(HttpResponse::Ok().json(json!({ "message_id": message_id })))
}
