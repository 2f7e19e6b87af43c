//! Tenant subscription management backed by Stripe. All endpoints are
//! admin-only and operate on the caller's tenant row.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::api::extract::TenantContext;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::tenant::{plan, Tenant};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
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

fn plan_limits(name: &str) -> (i32, i32) {
    // (patient limit, user limit)
    match name {
        "basic" => (1000, 3),
        "professional" => (5000, 10),
        _ => (i32::MAX, i32::MAX),
    }
}

pub async fn plans(state: web::Data<AppState>, ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[])?;

    let data: Vec<_> = plan::ALL
        .iter()
        .map(|&name| {
            let (patients, users) = plan_limits(name);
            json!({
                "name": name,
                "patient_limit": patients,
                "user_limit": users,
                "available": state.config.stripe.prices.for_plan(name).is_some(),
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}

pub async fn status(state: web::Data<AppState>, ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[])?;
    let tenant = fetch_tenant(&state, ctx.auth.tenant_id()).await?;

    let mut body = json!({
        "plan_type": tenant.plan_type,
        "subscription_status": tenant.subscription_status,
        "trial_ends_at": tenant.trial_ends_at,
        "patient_limit": tenant.patient_limit,
        "has_stripe_customer": tenant.stripe_customer_id.is_some(),
    });

    if let Some(subscription_id) = &tenant.stripe_subscription_id {
        match state.stripe.get_subscription(subscription_id).await {
            Ok(subscription) => {
                body["stripe"] = json!({
                    "status": subscription.status,
                    "cancel_at_period_end": subscription.cancel_at_period_end,
                    "current_period_end": subscription.current_period_end,
                });
            }
            // Local state is still useful when Stripe is unreachable.
            Err(err) => {
                tracing::warn!(error = %err, "stripe subscription lookup failed");
            }
        }
    }
    Ok(HttpResponse::Ok().json(body))
}

pub async fn checkout(
    state: web::Data<AppState>,
    req: HttpRequest,
    ctx: TenantContext,
    payload: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[])?;
    let tenant = fetch_tenant(&state, ctx.auth.tenant_id()).await?;

    let price_id = state
        .config
        .stripe
        .prices
        .for_plan(&payload.plan)
        .ok_or_else(|| ApiError::validation(format!("unknown plan: {}", payload.plan)))?;

    let app_url = state.config.server.app_url.trim_end_matches('/');
    let session = state
        .stripe
        .create_checkout_session(
            price_id,
            &tenant.email,
            &format!("{app_url}/subscription?status=success"),
            &format!("{app_url}/subscription?status=cancelled"),
            &[
                ("tenant_id", tenant.id.to_string()),
                ("plan", payload.plan.clone()),
            ],
        )
        .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "checkout_session", None)
            .with_details(json!({ "plan": payload.plan, "session_id": session.id })),
    );
    Ok(HttpResponse::Ok().json(json!({ "url": session.url, "session_id": session.id })))
}

pub async fn portal(state: web::Data<AppState>, ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[])?;
    let tenant = fetch_tenant(&state, ctx.auth.tenant_id()).await?;

    let customer_id = tenant
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::validation("tenant has no billing account yet"))?;

    let app_url = state.config.server.app_url.trim_end_matches('/');
    let session = state
        .stripe
        .create_portal_session(customer_id, &format!("{app_url}/subscription"))
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "url": session.url })))
}

/// Cancel at period end; access continues until the paid period runs out.
pub async fn cancel(
    state: web::Data<AppState>,
    req: HttpRequest,
    ctx: TenantContext,
) -> Result<HttpResponse, ApiError> {
    ctx.auth.require_role(&[])?;
    let tenant = fetch_tenant(&state, ctx.auth.tenant_id()).await?;

    let subscription_id = tenant
        .stripe_subscription_id
        .as_deref()
        .ok_or_else(|| ApiError::validation("tenant has no active subscription"))?;

    let subscription = state.stripe.cancel_at_period_end(subscription_id).await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "subscription", None)
            .with_details(json!({ "cancel_at_period_end": true })),
    );
    Ok(HttpResponse::Ok().json(json!({
        "status": subscription.status,
        "cancel_at_period_end": subscription.cancel_at_period_end,
        "current_period_end": subscription.current_period_end,
    })))
}
