//! Request extractors: authenticated user, tenant-scoped database handle,
//! API-key tenant access.
//!
//! These play the role of middleware: a handler that takes [`TenantContext`]
//! cannot run without a valid token, an active tenant and a connection whose
//! `search_path` is pinned to that tenant's schema. No tenant context, no
//! database handle.

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::Utc;
use futures::future::{ready, LocalBoxFuture, Ready};

use crate::auth::{hash_api_key, Claims};
use crate::db::{tenancy::TenantDb, Database};
use crate::error::ApiError;
use crate::models::Tenant;
use crate::state::AppState;

/// The authenticated user, decoded from the access token.
///
/// Token lookup order matches the original: HttpOnly cookie first, then the
/// `Authorization: Bearer` header for API clients.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: Claims,
}

impl AuthUser {
    pub fn user_id(&self) -> i64 {
        self.claims.user_id
    }

    pub fn tenant_id(&self) -> i64 {
        self.claims.tenant_id
    }

    pub fn role(&self) -> &str {
        &self.claims.role
    }

    /// Role gate. Admins pass every check.
    pub fn require_role(&self, allowed: &[&str]) -> Result<(), ApiError> {
        if self.claims.role == "admin" || allowed.contains(&self.claims.role.as_str()) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("insufficient permissions".into()))
        }
    }
}

fn token_from_request(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie("auth_token") {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(str::to_string)
}

fn auth_from_request(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::internal("application state missing"))?;
    let token = token_from_request(req)
        .ok_or_else(|| ApiError::Unauthorized("authentication required".into()))?;
    let claims = state.jwt.verify_access(&token)?;
    Ok(AuthUser { claims })
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(auth_from_request(req))
    }
}

/// Authenticated user plus a database connection scoped to their tenant.
pub struct TenantContext {
    pub auth: AuthUser,
    pub db: TenantDb,
}

impl FromRequest for TenantContext {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let auth = auth_from_request(&req)?;
            let state = req
                .app_data::<web::Data<AppState>>()
                .ok_or_else(|| ApiError::internal("application state missing"))?;

            // The login flow caches the tenant's active flag in the token so
            // the common path skips a lookup. Tokens minted before a tenant
            // was deactivated fall through to the database check.
            if !auth.claims.tenant_active {
                let tenant = fetch_active_tenant(&state.db, auth.tenant_id()).await?;
                if !tenant.active {
                    return Err(ApiError::Forbidden("tenant account is inactive".into()));
                }
            }

            let db = TenantDb::acquire(state.db.pool(), auth.tenant_id()).await?;
            Ok(TenantContext { auth, db })
        })
    }
}

async fn fetch_active_tenant(db: &Database, tenant_id: i64) -> Result<Tenant, ApiError> {
    sqlx::query_as::<_, Tenant>(
        "SELECT * FROM public.tenants WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(tenant_id)
    .fetch_optional(db.pool())
    .await?
    .ok_or(ApiError::Forbidden("tenant not found".into()))
}

/// Tenant resolved from an `X-API-Key` header, for machine integrations
/// (WhatsApp bots and the like). Keys are stored hashed; incoming keys are
/// hashed and compared, never logged.
pub struct ApiTenant {
    pub tenant: Tenant,
    pub db: TenantDb,
}

impl FromRequest for ApiTenant {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let state = req
                .app_data::<web::Data<AppState>>()
                .ok_or_else(|| ApiError::internal("application state missing"))?
                .clone();

            let key = req
                .headers()
                .get("X-API-Key")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    ApiError::Unauthorized("API key required, use the X-API-Key header".into())
                })?;

            let key_hash = hash_api_key(key);
            let tenant = sqlx::query_as::<_, Tenant>(
                "SELECT * FROM public.tenants \
                 WHERE api_key_hash = $1 AND api_key_active AND active AND deleted_at IS NULL",
            )
            .bind(&key_hash)
            .fetch_optional(state.db.pool())
            .await?
            .ok_or(ApiError::Unauthorized("invalid or inactive API key".into()))?;

            if tenant.api_key_is_expired(Utc::now()) {
                return Err(ApiError::Unauthorized(
                    "API key has expired, generate a new one".into(),
                ));
            }

            // Track last usage without delaying the request.
            let pool = state.db.pool().clone();
            let tenant_id = tenant.id;
            tokio::spawn(async move {
                let _ = sqlx::query(
                    "UPDATE public.tenants SET api_key_last_used_at = now() WHERE id = $1",
                )
                .bind(tenant_id)
                .execute(&pool)
                .await;
            });

            let db = TenantDb::acquire(state.db.pool(), tenant.id).await?;
            Ok(ApiTenant { tenant, db })
        })
    }
}

/// Client IP for audit rows, honouring a reverse proxy's header.
pub fn client_ip(req: &HttpRequest) -> Option<String> {
    req.connection_info().realip_remote_addr().map(str::to_string)
}
