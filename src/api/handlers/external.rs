//! Machine API authenticated with `X-API-Key`, consumed by WhatsApp bots
//! and other external integrations.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::ApiTenant;
use crate::api::handlers::leads;
use crate::audit::{self, action, AuditEntry};
use crate::error::ApiError;
use crate::integrations::whatsapp::normalize_phone;
use crate::models::crm::Lead;
use crate::models::Patient;

#[derive(Debug, Deserialize, Validate)]
pub struct ExternalLeadRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 8, max = 20))]
    pub phone: String,
    pub contact_reason: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "whatsapp".to_string()
}

async fn bot_user_id(api: &mut ApiTenant, pool: &sqlx::PgPool) -> Result<i64, ApiError> {
    let admin: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM public.users \
         WHERE tenant_id = $1 AND role = 'admin' AND deleted_at IS NULL \
         ORDER BY id LIMIT 1",
    )
    .bind(api.tenant.id)
    .fetch_optional(pool)
    .await?;
    admin
        .map(|(id,)| id)
        .ok_or_else(|| ApiError::internal("tenant has no admin user"))
}

pub async fn create_lead(
    state: web::Data<crate::state::AppState>,
    mut api: ApiTenant,
    payload: web::Json<ExternalLeadRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let created_by = bot_user_id(&mut api, state.db.pool()).await?;
    let (lead, created) = leads::upsert_by_phone(
        api.db.conn(),
        &payload.name,
        &payload.phone,
        &payload.source,
        payload.contact_reason.as_deref(),
        created_by,
    )
    .await?;

    if created {
        audit::record(
            state.db.pool(),
            AuditEntry::machine(api.tenant.id, action::CREATE, "lead", Some(lead.id)),
        );
    }
    let body = json!({ "created": created, "lead": lead });
    if created {
        Ok(HttpResponse::Created().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

/// Phone lookup: tells the bot whether the number belongs to a known lead
/// or patient.
pub async fn check_phone(
    mut api: ApiTenant,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let phone = normalize_phone(&path.into_inner());
    if phone.len() < 8 {
        return Err(ApiError::validation("phone number is too short"));
    }

    let patient = sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients \
         WHERE deleted_at IS NULL AND \
           (regexp_replace(coalesce(phone, ''), '\\D', '', 'g') = $1 OR \
            regexp_replace(coalesce(cell_phone, ''), '\\D', '', 'g') = $1) \
         LIMIT 1",
    )
    .bind(&phone)
    .fetch_optional(api.db.conn())
    .await?;
    if let Some(patient) = patient {
        return Ok(HttpResponse::Ok().json(json!({
            "kind": "patient",
            "patient": { "id": patient.id, "name": patient.name },
        })));
    }

    let lead =
        sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE phone = $1 AND deleted_at IS NULL")
            .bind(&phone)
            .fetch_optional(api.db.conn())
            .await?;
    match lead {
        Some(lead) => Ok(HttpResponse::Ok().json(json!({
            "kind": "lead",
            "lead": { "id": lead.id, "name": lead.name, "status": lead.status },
        }))),
        None => Ok(HttpResponse::Ok().json(json!({ "kind": "unknown" }))),
    }
}
