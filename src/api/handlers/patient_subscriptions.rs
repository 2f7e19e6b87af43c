//! Recurring plans sold to patients through Stripe Checkout. The local row
//! starts as `pending` and is moved along by the Stripe webhook.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::{patients, Pagination};
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::{PatientSubscription, PatientSubscriptionPayment};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscriptionListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub patient_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    pub patient_id: i64,
    #[validate(length(min = 1))]
    pub stripe_price_id: String,
    /// Snapshot fields shown in the UI while the plan is pending.
    pub product_name: Option<String>,
    pub price_amount: Option<i64>,
    pub price_currency: Option<String>,
    pub billing_interval: Option<String>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<SubscriptionListQuery>,
) -> Result<HttpResponse, ApiError> {
    let subscriptions = sqlx::query_as::<_, PatientSubscription>(
        "SELECT * FROM patient_subscriptions \
         WHERE deleted_at IS NULL \
           AND ($1::bigint IS NULL OR patient_id = $1) \
           AND ($2::text IS NULL OR status = $2) \
         ORDER BY created_at DESC \
         LIMIT $3 OFFSET $4",
    )
    .bind(query.patient_id)
    .bind(&query.status)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": subscriptions })))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<PatientSubscription, ApiError> {
    sqlx::query_as::<_, PatientSubscription>(
        "SELECT * FROM patient_subscriptions WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("patient subscription"))
}

/// Subscription with its invoice history.
pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let subscription = fetch(&mut ctx, path.into_inner()).await?;
    let payments = sqlx::query_as::<_, PatientSubscriptionPayment>(
        "SELECT * FROM patient_subscription_payments \
         WHERE patient_subscription_id = $1 \
         ORDER BY created_at DESC",
    )
    .bind(subscription.id)
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "subscription": subscription, "payments": payments })))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<CreateSubscriptionRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let patient = patients::fetch(&mut ctx, payload.patient_id).await?;

    let active: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM patient_subscriptions \
         WHERE patient_id = $1 AND stripe_price_id = $2 AND deleted_at IS NULL \
           AND status IN ('pending', 'active', 'past_due')",
    )
    .bind(patient.id)
    .bind(&payload.stripe_price_id)
    .fetch_optional(ctx.db.conn())
    .await?;
    if let Some((id,)) = active {
        return Err(ApiError::Conflict(format!(
            "patient already has a subscription for this plan (id {id})"
        )));
    }

    let email = patient
        .email
        .as_deref()
        .ok_or_else(|| ApiError::validation("patient has no email for checkout"))?;

    let app_url = state.config.server.app_url.trim_end_matches('/');
    let session = state
        .stripe
        .create_checkout_session(
            &payload.stripe_price_id,
            email,
            &format!("{app_url}/plans?status=success&patient_id={}", patient.id),
            &format!("{app_url}/plans?status=cancelled&patient_id={}", patient.id),
            &[
                ("patient_id", patient.id.to_string()),
                ("tenant_id", ctx.auth.tenant_id().to_string()),
            ],
        )
        .await?;

    let subscription = sqlx::query_as::<_, PatientSubscription>(
        "INSERT INTO patient_subscriptions \
           (patient_id, stripe_customer_id, stripe_price_id, product_name, price_amount, \
            price_currency, billing_interval, status, checkout_session_id, checkout_url, \
            created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10) \
         RETURNING *",
    )
    .bind(patient.id)
    .bind(&session.customer)
    .bind(&payload.stripe_price_id)
    .bind(&payload.product_name)
    .bind(payload.price_amount)
    .bind(&payload.price_currency)
    .bind(&payload.billing_interval)
    .bind(&session.id)
    .bind(&session.url)
    .bind(ctx.auth.user_id())
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "patient_subscription",
            Some(subscription.id),
        ),
    );
    Ok(HttpResponse::Created().json(json!({
        "subscription": subscription,
        "checkout_url": session.url,
    })))
}

/// Graceful cancellation: at period end when Stripe knows the subscription,
/// immediately when checkout never completed.
pub async fn cancel(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let subscription = fetch(&mut ctx, id).await?;

    let subscription = match subscription.stripe_subscription_id.as_deref() {
        Some(stripe_id) => {
            state.stripe.cancel_at_period_end(stripe_id).await?;
            sqlx::query_as::<_, PatientSubscription>(
                "UPDATE patient_subscriptions \
                 SET cancel_at_period_end = TRUE, updated_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_one(ctx.db.conn())
            .await?
        }
        None => {
            sqlx::query_as::<_, PatientSubscription>(
                "UPDATE patient_subscriptions \
                 SET status = 'canceled', canceled_at = now(), updated_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_one(ctx.db.conn())
            .await?
        }
    };

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::UPDATE,
            "patient_subscription",
            Some(id),
        )
        .with_details(json!({ "cancelled": true })),
    );
    Ok(HttpResponse::Ok().json(subscription))
}
