//! Public webhook endpoints for Stripe and the Meta WhatsApp platform.
//!
//! Both are unauthenticated: Stripe is verified through its signature
//! header, Meta through the verification handshake. Processing failures are
//! logged and acknowledged with 200 so the platforms do not retry forever.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::api::handlers::leads;
use crate::db::TenantDb;
use crate::error::ApiError;
use crate::integrations::stripe::{self, CheckoutSession, Subscription, WebhookEvent};
use crate::integrations::whatsapp::WebhookPayload;
use crate::models::Tenant;
use crate::state::AppState;

// ---- Stripe ----

/// Invoice fields the webhook cares about.
#[derive(Debug, Deserialize)]
struct WebhookInvoice {
    id: String,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    amount_paid: i64,
    #[serde(default)]
    amount_due: i64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    period_start: Option<i64>,
    #[serde(default)]
    period_end: Option<i64>,
    #[serde(default)]
    hosted_invoice_url: Option<String>,
    #[serde(default)]
    last_finalization_error: Option<InvoiceError>,
}

#[derive(Debug, Deserialize)]
struct InvoiceError {
    #[serde(default)]
    message: String,
}

fn unix_ts(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

pub async fn stripe_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let tenant_id = path.into_inner();

    let signature = req
        .headers()
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Stripe-Signature header".into()))?;
    let event = stripe::construct_event(
        &body,
        signature,
        &state.stripe.webhook_secret,
        Utc::now().timestamp(),
    )?;

    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM public.tenants WHERE id = $1 AND deleted_at IS NULL")
            .bind(tenant_id)
            .fetch_optional(state.db.pool())
            .await?;
    if exists.is_none() {
        return Err(ApiError::NotFound("tenant"));
    }

    let mut db = TenantDb::acquire(state.db.pool(), tenant_id).await?;

    tracing::info!(tenant_id, event = %event.event_type, "stripe webhook received");
    if let Err(err) = apply_stripe_event(&state, &mut db, tenant_id, &event).await {
        tracing::error!(tenant_id, event = %event.event_type, error = %err,
            "stripe webhook processing failed");
    }
    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

async fn apply_stripe_event(
    state: &AppState,
    db: &mut TenantDb,
    tenant_id: i64,
    event: &WebhookEvent,
) -> Result<(), ApiError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSession = serde_json::from_value(event.data.object.clone())
                .map_err(|e| ApiError::validation(format!("malformed checkout session: {e}")))?;
            checkout_completed(state, db, tenant_id, &session).await
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let subscription: Subscription = serde_json::from_value(event.data.object.clone())
                .map_err(|e| ApiError::validation(format!("malformed subscription: {e}")))?;
            subscription_updated(state, db, tenant_id, &subscription).await
        }
        "customer.subscription.deleted" => {
            let subscription: Subscription = serde_json::from_value(event.data.object.clone())
                .map_err(|e| ApiError::validation(format!("malformed subscription: {e}")))?;
            subscription_deleted(state, db, tenant_id, &subscription).await
        }
        "invoice.paid" => {
            let invoice: WebhookInvoice = serde_json::from_value(event.data.object.clone())
                .map_err(|e| ApiError::validation(format!("malformed invoice: {e}")))?;
            invoice_paid(db, &invoice).await
        }
        "invoice.payment_failed" => {
            let invoice: WebhookInvoice = serde_json::from_value(event.data.object.clone())
                .map_err(|e| ApiError::validation(format!("malformed invoice: {e}")))?;
            invoice_payment_failed(db, &invoice).await
        }
        other => {
            tracing::debug!(event = other, "unhandled stripe event type");
            Ok(())
        }
    }
}

/// A completed checkout either activates the tenant's own plan (metadata
/// carries `plan`) or a patient subscription created through the clinic.
async fn checkout_completed(
    state: &AppState,
    db: &mut TenantDb,
    tenant_id: i64,
    session: &CheckoutSession,
) -> Result<(), ApiError> {
    let updated = sqlx::query(
        "UPDATE patient_subscriptions SET \
           stripe_subscription_id = coalesce($1, stripe_subscription_id), \
           stripe_customer_id = coalesce($2, stripe_customer_id), \
           status = 'active', updated_at = now() \
         WHERE checkout_session_id = $3 AND deleted_at IS NULL",
    )
    .bind(&session.subscription)
    .bind(&session.customer)
    .bind(&session.id)
    .execute(db.conn())
    .await?;
    if updated.rows_affected() > 0 {
        return Ok(());
    }

    // Not a patient checkout; treat it as the clinic's own plan purchase.
    sqlx::query(
        "UPDATE public.tenants SET \
           stripe_customer_id = coalesce($1, stripe_customer_id), \
           stripe_subscription_id = coalesce($2, stripe_subscription_id), \
           subscription_status = 'active', updated_at = now() \
         WHERE id = $3",
    )
    .bind(&session.customer)
    .bind(&session.subscription)
    .bind(tenant_id)
    .execute(state.db.pool())
    .await?;
    Ok(())
}

fn map_subscription_status(stripe_status: &str) -> &'static str {
    match stripe_status {
        "active" | "trialing" => "active",
        "past_due" | "unpaid" => "past_due",
        "canceled" | "incomplete_expired" => "cancelled",
        _ => "past_due",
    }
}

async fn subscription_updated(
    state: &AppState,
    db: &mut TenantDb,
    tenant_id: i64,
    subscription: &Subscription,
) -> Result<(), ApiError> {
    let updated = sqlx::query(
        "UPDATE patient_subscriptions SET \
           status = $1, cancel_at_period_end = $2, current_period_start = $3, \
           current_period_end = $4, canceled_at = $5, updated_at = now() \
         WHERE stripe_subscription_id = $6 AND deleted_at IS NULL",
    )
    .bind(&subscription.status)
    .bind(subscription.cancel_at_period_end)
    .bind(unix_ts(subscription.current_period_start))
    .bind(unix_ts(subscription.current_period_end))
    .bind(unix_ts(subscription.canceled_at))
    .bind(&subscription.id)
    .execute(db.conn())
    .await?;
    if updated.rows_affected() > 0 {
        return Ok(());
    }

    sqlx::query(
        "UPDATE public.tenants SET subscription_status = $1, updated_at = now() \
         WHERE id = $2 AND stripe_subscription_id = $3",
    )
    .bind(map_subscription_status(&subscription.status))
    .bind(tenant_id)
    .bind(&subscription.id)
    .execute(state.db.pool())
    .await?;
    Ok(())
}

async fn subscription_deleted(
    state: &AppState,
    db: &mut TenantDb,
    tenant_id: i64,
    subscription: &Subscription,
) -> Result<(), ApiError> {
    let updated = sqlx::query(
        "UPDATE patient_subscriptions SET \
           status = 'canceled', canceled_at = now(), updated_at = now() \
         WHERE stripe_subscription_id = $1 AND deleted_at IS NULL",
    )
    .bind(&subscription.id)
    .execute(db.conn())
    .await?;
    if updated.rows_affected() > 0 {
        return Ok(());
    }

    sqlx::query(
        "UPDATE public.tenants SET subscription_status = 'cancelled', updated_at = now() \
         WHERE id = $1 AND stripe_subscription_id = $2",
    )
    .bind(tenant_id)
    .bind(&subscription.id)
    .execute(state.db.pool())
    .await?;
    Ok(())
}

async fn subscription_row_id(
    db: &mut TenantDb,
    stripe_subscription_id: &str,
) -> Result<Option<i64>, ApiError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM patient_subscriptions \
         WHERE stripe_subscription_id = $1 AND deleted_at IS NULL",
    )
    .bind(stripe_subscription_id)
    .fetch_optional(db.conn())
    .await?;
    Ok(row.map(|(id,)| id))
}

async fn invoice_paid(db: &mut TenantDb, invoice: &WebhookInvoice) -> Result<(), ApiError> {
    let Some(stripe_subscription_id) = &invoice.subscription else {
        return Ok(()); // one-off invoice, not ours
    };
    let Some(subscription_id) = subscription_row_id(db, stripe_subscription_id).await? else {
        tracing::warn!(invoice = %invoice.id, "invoice for unknown patient subscription");
        return Ok(());
    };

    sqlx::query(
        "INSERT INTO patient_subscription_payments \
           (patient_subscription_id, stripe_invoice_id, amount, currency, status, \
            period_start, period_end, paid_at, invoice_url) \
         VALUES ($1, $2, $3, $4, 'paid', $5, $6, now(), $7) \
         ON CONFLICT (stripe_invoice_id) DO UPDATE SET \
           status = 'paid', amount = excluded.amount, paid_at = now(), \
           invoice_url = coalesce(excluded.invoice_url, patient_subscription_payments.invoice_url), \
           updated_at = now()",
    )
    .bind(subscription_id)
    .bind(&invoice.id)
    .bind(invoice.amount_paid)
    .bind(&invoice.currency)
    .bind(unix_ts(invoice.period_start))
    .bind(unix_ts(invoice.period_end))
    .bind(&invoice.hosted_invoice_url)
    .execute(db.conn())
    .await?;
    Ok(())
}

async fn invoice_payment_failed(
    db: &mut TenantDb,
    invoice: &WebhookInvoice,
) -> Result<(), ApiError> {
    let Some(stripe_subscription_id) = &invoice.subscription else {
        return Ok(());
    };
    let Some(subscription_id) = subscription_row_id(db, stripe_subscription_id).await? else {
        return Ok(());
    };

    sqlx::query(
        "UPDATE patient_subscriptions SET status = 'past_due', updated_at = now() WHERE id = $1",
    )
    .bind(subscription_id)
    .execute(db.conn())
    .await?;

    let failure_message = invoice
        .last_finalization_error
        .as_ref()
        .map(|e| e.message.clone());
    sqlx::query(
        "INSERT INTO patient_subscription_payments \
           (patient_subscription_id, stripe_invoice_id, amount, currency, status, \
            period_start, period_end, invoice_url, failure_message) \
         VALUES ($1, $2, $3, $4, 'open', $5, $6, $7, $8) \
         ON CONFLICT (stripe_invoice_id) DO UPDATE SET \
           status = 'open', \
           failure_message = excluded.failure_message, \
           updated_at = now()",
    )
    .bind(subscription_id)
    .bind(&invoice.id)
    .bind(invoice.amount_due)
    .bind(&invoice.currency)
    .bind(unix_ts(invoice.period_start))
    .bind(unix_ts(invoice.period_end))
    .bind(&invoice.hosted_invoice_url)
    .bind(&failure_message)
    .execute(db.conn())
    .await?;
    Ok(())
}

// ---- WhatsApp ----

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Meta's subscription handshake: echo the challenge when the token matches.
pub async fn whatsapp_verify(
    state: web::Data<AppState>,
    query: web::Query<VerifyQuery>,
) -> HttpResponse {
    let query = query.into_inner();
    if query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(state.whatsapp.webhook_verify_token.as_str())
    {
        return HttpResponse::Ok()
            .content_type("text/plain")
            .body(query.challenge.unwrap_or_default());
    }
    HttpResponse::Forbidden().json(json!({ "error": "verification failed" }))
}

pub async fn whatsapp_inbound(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<WebhookPayload>,
) -> Result<HttpResponse, ApiError> {
    let tenant_id = path.into_inner();
    let tenant = sqlx::query_as::<_, Tenant>(
        "SELECT * FROM public.tenants WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(tenant_id)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or(ApiError::NotFound("tenant"))?;

    // Leads created off the webhook are attributed to the clinic's first
    // admin user.
    let admin: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM public.users \
         WHERE tenant_id = $1 AND role = 'admin' AND deleted_at IS NULL \
         ORDER BY id LIMIT 1",
    )
    .bind(tenant.id)
    .fetch_optional(state.db.pool())
    .await?;
    let Some((admin_id,)) = admin else {
        tracing::warn!(tenant_id, "whatsapp webhook for tenant without admin user");
        return Ok(HttpResponse::Ok().json(json!({ "status": "received" })));
    };

    let mut db = TenantDb::acquire(state.db.pool(), tenant_id).await?;

    for entry in &payload.entry {
        for change in &entry.changes {
            let value = &change.value;

            for status in &value.statuses {
                tracing::debug!(
                    message_id = %status.id,
                    status = %status.status,
                    recipient = %status.recipient_id,
                    "whatsapp message status update",
                );
            }

            for message in &value.messages {
                let name = value
                    .contacts
                    .iter()
                    .find(|c| c.wa_id == message.from)
                    .and_then(|c| c.profile.as_ref())
                    .map(|p| p.name.as_str())
                    .unwrap_or("Contato WhatsApp");
                let reason = message.text.as_ref().map(|t| t.body.as_str());

                match leads::upsert_by_phone(
                    db.conn(),
                    name,
                    &message.from,
                    "whatsapp",
                    reason,
                    admin_id,
                )
                .await
                {
                    Ok((lead, true)) => {
                        tracing::info!(tenant_id, lead_id = lead.id, "lead created from whatsapp");
                    }
                    Ok((_, false)) => {}
                    Err(err) => {
                        tracing::error!(tenant_id, error = %err, "whatsapp lead creation failed");
                    }
                }
            }
        }
    }
    Ok(HttpResponse::Ok().json(json!({ "status": "received" })))
}
