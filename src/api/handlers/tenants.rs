//! Tenant registration, settings and the machine API key.

use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::AuthUser;
use crate::auth::{generate_api_key, hash_api_key, hash_password};
use crate::db::tenancy::{create_tenant_schema, drop_tenant_schema};
use crate::error::ApiError;
use crate::models::user::role;
use crate::models::Tenant;
use crate::state::AppState;

const TRIAL_DAYS: i64 = 14;
const API_KEY_TTL_DAYS: i64 = 365;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterTenantRequest {
    #[validate(length(min = 2, max = 200))]
    pub clinic_name: String,
    #[validate(length(min = 3, max = 63), custom(function = "validate_subdomain"))]
    pub subdomain: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,

    #[validate(length(min = 2, max = 200))]
    pub admin_name: String,
    #[validate(email)]
    pub admin_email: String,
    #[validate(length(min = 8, message = "password must have at least 8 characters"))]
    pub admin_password: String,
}

fn validate_subdomain(value: &str) -> Result<(), validator::ValidationError> {
    let ok = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if ok {
        Ok(())
    } else {
        Err(validator::ValidationError::new("subdomain"))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct TenantSettingsUpdate {
    #[validate(length(min = 2, max = 200))]
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

/// Public endpoint: create the tenant row, its schema and the admin user.
/// Any failure after the row insert tears the schema and the row down again.
pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterTenantRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM public.tenants WHERE subdomain = $1")
            .bind(&payload.subdomain)
            .fetch_optional(state.db.pool())
            .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("subdomain is already taken".into()));
    }

    let trial_ends_at = Utc::now() + Duration::days(TRIAL_DAYS);
    let tenant = sqlx::query_as::<_, Tenant>(
        "INSERT INTO public.tenants \
           (name, subdomain, email, phone, active, plan_type, subscription_status, \
            trial_ends_at, patient_limit) \
         VALUES ($1, $2, $3, $4, TRUE, 'basic', 'trialing', $5, 1000) \
         RETURNING *",
    )
    .bind(&payload.clinic_name)
    .bind(&payload.subdomain)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(trial_ends_at)
    .fetch_one(state.db.pool())
    .await?;

    if let Err(err) = provision(&state, &payload, tenant.id).await {
        // Roll the registration back so the subdomain can be retried.
        let _ = drop_tenant_schema(state.db.pool(), tenant.id).await;
        let _ = sqlx::query("DELETE FROM public.tenants WHERE id = $1")
            .bind(tenant.id)
            .execute(state.db.pool())
            .await;
        return Err(err);
    }

    tracing::info!(tenant_id = tenant.id, subdomain = %tenant.subdomain, "tenant registered");
    Ok(HttpResponse::Created().json(json!({
        "tenant": tenant,
        "message": "clinic registered, log in with the admin credentials",
    })))
}

async fn provision(
    state: &AppState,
    payload: &RegisterTenantRequest,
    tenant_id: i64,
) -> Result<(), ApiError> {
    create_tenant_schema(state.db.pool(), tenant_id).await?;

    let password_hash = hash_password(&payload.admin_password)?;
    sqlx::query(
        "INSERT INTO public.users (tenant_id, name, email, password_hash, role, active) \
         VALUES ($1, $2, $3, $4, $5, TRUE)",
    )
    .bind(tenant_id)
    .bind(&payload.admin_name)
    .bind(&payload.admin_email)
    .bind(&password_hash)
    .bind(role::ADMIN)
    .execute(state.db.pool())
    .await?;
    Ok(())
}

pub async fn settings(state: web::Data<AppState>, auth: AuthUser) -> Result<HttpResponse, ApiError> {
    let tenant = sqlx::query_as::<_, Tenant>(
        "SELECT * FROM public.tenants WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(auth.tenant_id())
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(ApiError::NotFound("tenant"))?;
    Ok(HttpResponse::Ok().json(tenant))
}

pub async fn update_settings(
    state: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<TenantSettingsUpdate>,
) -> Result<HttpResponse, ApiError> {
    auth.require_role(&[])?;
    payload.validate()?;

    let tenant = sqlx::query_as::<_, Tenant>(
        "UPDATE public.tenants \
         SET name = $1, phone = $2, address = $3, city = $4, state = $5, zip_code = $6, \
             updated_at = now() \
         WHERE id = $7 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.phone)
    .bind(&payload.address)
    .bind(&payload.city)
    .bind(&payload.state)
    .bind(&payload.zip_code)
    .bind(auth.tenant_id())
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(ApiError::NotFound("tenant"))?;

    Ok(HttpResponse::Ok().json(tenant))
}

/// Generate (or rotate) the tenant API key. The clear key is returned exactly
/// once; only its hash is stored.
pub async fn generate_key(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    auth.require_role(&[])?;

    let key = generate_api_key();
    let expires_at = Utc::now() + Duration::days(API_KEY_TTL_DAYS);
    sqlx::query(
        "UPDATE public.tenants \
         SET api_key_hash = $1, api_key_active = TRUE, api_key_created_at = now(), \
             api_key_expires_at = $2, api_key_last_used_at = NULL, updated_at = now() \
         WHERE id = $3",
    )
    .bind(hash_api_key(&key))
    .bind(expires_at)
    .bind(auth.tenant_id())
    .execute(state.db.pool())
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "api_key": key,
        "expires_at": expires_at,
        "message": "store this key now, it will not be shown again",
    })))
}

pub async fn key_status(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    auth.require_role(&[])?;

    let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM public.tenants WHERE id = $1")
        .bind(auth.tenant_id())
        .fetch_one(state.db.pool())
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "has_key": tenant.api_key_hash.is_some(),
        "active": tenant.api_key_active,
        "created_at": tenant.api_key_created_at,
        "expires_at": tenant.api_key_expires_at,
        "last_used_at": tenant.api_key_last_used_at,
        "expired": tenant.api_key_is_expired(Utc::now()),
    })))
}

#[derive(Debug, Deserialize)]
pub struct KeyToggle {
    pub active: bool,
}

pub async fn toggle_key(
    state: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<KeyToggle>,
) -> Result<HttpResponse, ApiError> {
    auth.require_role(&[])?;

    let updated = sqlx::query(
        "UPDATE public.tenants SET api_key_active = $1, updated_at = now() \
         WHERE id = $2 AND api_key_hash IS NOT NULL",
    )
    .bind(payload.active)
    .bind(auth.tenant_id())
    .execute(state.db.pool())
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("API key"));
    }

    Ok(HttpResponse::Ok().json(json!({ "active": payload.active })))
}

pub async fn revoke_key(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    auth.require_role(&[])?;

    sqlx::query(
        "UPDATE public.tenants \
         SET api_key_hash = NULL, api_key_active = FALSE, api_key_created_at = NULL, \
             api_key_expires_at = NULL, api_key_last_used_at = NULL, updated_at = now() \
         WHERE id = $1",
    )
    .bind(auth.tenant_id())
    .execute(state.db.pool())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "API key revoked" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_validation() {
        assert!(validate_subdomain("clinica-sorriso").is_ok());
        assert!(validate_subdomain("clinic123").is_ok());
        assert!(validate_subdomain("-leading").is_err());
        assert!(validate_subdomain("trailing-").is_err());
        assert!(validate_subdomain("UpperCase").is_err());
        assert!(validate_subdomain("dots.not.allowed").is_err());
    }
}
