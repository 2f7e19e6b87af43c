//! Login, token refresh and the authenticated user's own profile.

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::{client_ip, AuthUser};
use crate::audit::{self, AuditEntry};
use crate::auth::{hash_password, verify_password};
use crate::error::ApiError;
use crate::models::{Tenant, User};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    /// Disambiguates when the same email exists in more than one clinic.
    pub subdomain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub phone: Option<String>,
    pub specialty: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordChange {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 8, message = "new password must have at least 8 characters"))]
    pub new_password: String,
}

fn access_cookie(token: &str, max_age_seconds: i64) -> Cookie<'static> {
    Cookie::build("auth_token", token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(max_age_seconds))
        .finish()
}

fn refresh_cookie(token: &str, max_age_seconds: i64) -> Cookie<'static> {
    Cookie::build("refresh_token", token.to_string())
        .path("/api/auth")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(max_age_seconds))
        .finish()
}

async fn fetch_user(state: &AppState, user_id: i64) -> Result<User, ApiError> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM public.users WHERE id = $1 AND active AND deleted_at IS NULL",
    )
    .bind(user_id)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(ApiError::NotFound("user"))
}

async fn fetch_tenant(state: &AppState, tenant_id: i64) -> Result<Tenant, ApiError> {
    sqlx::query_as::<_, Tenant>(
        "SELECT * FROM public.tenants WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(tenant_id)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(ApiError::NotFound("tenant"))
}

fn token_pair_response(
    state: &AppState,
    user: &User,
    tenant: &Tenant,
) -> Result<HttpResponse, ApiError> {
    let access = state.jwt.issue_access(
        user.id,
        user.tenant_id,
        &user.email,
        &user.role,
        tenant.active,
    )?;
    let refresh = state.jwt.issue_refresh(user.id)?;

    Ok(HttpResponse::Ok()
        .cookie(access_cookie(&access, state.jwt.access_ttl_seconds()))
        .cookie(refresh_cookie(&refresh, state.jwt.refresh_ttl_seconds()))
        .json(json!({
            "token": access,
            "refresh_token": refresh,
            "user": user,
            "tenant": { "id": tenant.id, "name": tenant.name, "subdomain": tenant.subdomain },
        })))
}

pub async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let user = match &payload.subdomain {
        Some(subdomain) => sqlx::query_as::<_, User>(
            "SELECT u.* FROM public.users u \
             JOIN public.tenants t ON t.id = u.tenant_id \
             WHERE u.email = $1 AND t.subdomain = $2 AND u.active AND u.deleted_at IS NULL",
        )
        .bind(&payload.email)
        .bind(subdomain)
        .fetch_optional(state.db.pool())
        .await?,
        None => {
            let matches = sqlx::query_as::<_, User>(
                "SELECT * FROM public.users \
                 WHERE email = $1 AND active AND deleted_at IS NULL",
            )
            .bind(&payload.email)
            .fetch_all(state.db.pool())
            .await?;
            if matches.len() > 1 {
                return Err(ApiError::validation(
                    "email exists in more than one clinic, pass the subdomain",
                ));
            }
            matches.into_iter().next()
        }
    };

    let Some(user) = user else {
        return Err(ApiError::Unauthorized("invalid email or password".into()));
    };
    if !verify_password(&payload.password, &user.password_hash) {
        tracing::warn!(user_id = user.id, ip = ?client_ip(&req), "failed login attempt");
        return Err(ApiError::Unauthorized("invalid email or password".into()));
    }

    let tenant = fetch_tenant(&state, user.tenant_id).await?;
    if !tenant.active {
        return Err(ApiError::Forbidden("tenant account is inactive".into()));
    }

    audit::record(
        state.db.pool(),
        AuditEntry {
            tenant_id: user.tenant_id,
            user_id: user.id,
            user_email: user.email.clone(),
            user_role: user.role.clone(),
            action: audit::action::LOGIN.into(),
            resource: "session".into(),
            resource_id: None,
            method: req.method().to_string(),
            path: req.path().to_string(),
            ip_address: client_ip(&req),
            details: None,
            success: true,
        },
    );

    token_pair_response(&state, &user, &tenant)
}

pub async fn refresh(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    let token = payload
        .refresh_token
        .clone()
        .or_else(|| req.cookie("refresh_token").map(|c| c.value().to_string()))
        .ok_or_else(|| ApiError::Unauthorized("refresh token required".into()))?;

    let claims = state.jwt.verify_refresh(&token)?;
    let user = fetch_user(&state, claims.user_id).await?;
    let tenant = fetch_tenant(&state, user.tenant_id).await?;
    if !tenant.active {
        return Err(ApiError::Forbidden("tenant account is inactive".into()));
    }

    token_pair_response(&state, &user, &tenant)
}

pub async fn logout() -> HttpResponse {
    let mut access = access_cookie("", 0);
    access.make_removal();
    let mut refresh = refresh_cookie("", 0);
    refresh.make_removal();
    HttpResponse::Ok()
        .cookie(access)
        .cookie(refresh)
        .json(json!({ "message": "logged out" }))
}

pub async fn me(state: web::Data<AppState>, auth: AuthUser) -> Result<HttpResponse, ApiError> {
    let user = fetch_user(&state, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn update_profile(
    state: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<ProfileUpdate>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE public.users \
         SET name = $1, phone = $2, specialty = $3, updated_at = now() \
         WHERE id = $4 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.phone)
    .bind(&payload.specialty)
    .bind(auth.user_id())
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    Ok(HttpResponse::Ok().json(user))
}

pub async fn change_password(
    state: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<PasswordChange>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let user = fetch_user(&state, auth.user_id()).await?;
    if !verify_password(&payload.current_password, &user.password_hash) {
        return Err(ApiError::Unauthorized("current password is incorrect".into()));
    }

    let new_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE public.users SET password_hash = $1, updated_at = now() WHERE id = $2")
        .bind(&new_hash)
        .bind(user.id)
        .execute(state.db.pool())
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "password updated" })))
}
