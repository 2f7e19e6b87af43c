//! Financial transactions: installments, one-off charges and expenses.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::{csv_response, patients, pdf_response, Pagination};
use crate::audit::{self, AuditEntry};
use crate::documents::csv::export_payments;
use crate::documents::pdf::payment_receipt_pdf;
use crate::error::ApiError;
use crate::models::billing::{payment_status, Payment};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub patient_id: Option<i64>,
    pub budget_id: Option<i64>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentPayload {
    pub budget_id: Option<i64>,
    pub patient_id: i64,
    #[validate(length(min = 1))]
    pub kind: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub installment_number: Option<i32>,
    pub total_installments: Option<i32>,
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusPatch {
    pub status: String,
}

fn validate_payload(payload: &PaymentPayload) -> Result<(), ApiError> {
    if payload.kind != "income" && payload.kind != "expense" {
        return Err(ApiError::validation("kind must be income or expense"));
    }
    if payload.amount <= Decimal::ZERO {
        return Err(ApiError::validation("amount must be positive"));
    }
    Ok(())
}

const LIST_WHERE: &str = "deleted_at IS NULL \
       AND ($1::bigint IS NULL OR patient_id = $1) \
       AND ($2::bigint IS NULL OR budget_id = $2) \
       AND ($3::text IS NULL OR status = $3) \
       AND ($4::text IS NULL OR kind = $4) \
       AND ($5::timestamptz IS NULL OR coalesce(due_date, created_at) >= $5) \
       AND ($6::timestamptz IS NULL OR coalesce(due_date, created_at) < $6)";

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<PaymentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let sql = format!(
        "SELECT * FROM payments WHERE {LIST_WHERE} \
         ORDER BY coalesce(due_date, created_at) DESC LIMIT $7 OFFSET $8"
    );
    let payments = sqlx::query_as::<_, Payment>(&sql)
        .bind(query.patient_id)
        .bind(query.budget_id)
        .bind(&query.status)
        .bind(&query.kind)
        .bind(query.from)
        .bind(query.to)
        .bind(query.pagination.limit())
        .bind(query.pagination.offset())
        .fetch_all(ctx.db.conn())
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": payments })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let payment = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payment))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Payment, ApiError> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(ctx.db.conn())
        .await?
        .ok_or(ApiError::NotFound("payment"))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<PaymentPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    validate_payload(&payload)?;

    let payment = sqlx::query_as::<_, Payment>(
        "INSERT INTO payments \
           (budget_id, patient_id, kind, category, description, amount, payment_method, \
            installment_number, total_installments, status, due_date, notes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11) \
         RETURNING *",
    )
    .bind(payload.budget_id)
    .bind(payload.patient_id)
    .bind(&payload.kind)
    .bind(&payload.category)
    .bind(&payload.description)
    .bind(payload.amount)
    .bind(&payload.payment_method)
    .bind(payload.installment_number)
    .bind(payload.total_installments)
    .bind(payload.due_date)
    .bind(&payload.notes)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "payment", Some(payment.id)),
    );
    Ok(HttpResponse::Created().json(payment))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<PaymentPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    validate_payload(&payload)?;
    let id = path.into_inner();

    let existing = fetch(&mut ctx, id).await?;
    if existing.status == payment_status::PAID {
        return Err(ApiError::Conflict("a paid transaction cannot be edited".into()));
    }

    let payment = sqlx::query_as::<_, Payment>(
        "UPDATE payments SET \
           budget_id = $1, patient_id = $2, kind = $3, category = $4, description = $5, \
           amount = $6, payment_method = $7, installment_number = $8, total_installments = $9, \
           due_date = $10, notes = $11, updated_at = now() \
         WHERE id = $12 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(payload.budget_id)
    .bind(payload.patient_id)
    .bind(&payload.kind)
    .bind(&payload.category)
    .bind(&payload.description)
    .bind(payload.amount)
    .bind(&payload.payment_method)
    .bind(payload.installment_number)
    .bind(payload.total_installments)
    .bind(payload.due_date)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("payment"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "payment", Some(id)),
    );
    Ok(HttpResponse::Ok().json(payment))
}

pub async fn set_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<StatusPatch>,
) -> Result<HttpResponse, ApiError> {
    if !payment_status::is_valid(&payload.status) {
        return Err(ApiError::validation(format!("unknown status: {}", payload.status)));
    }
    let id = path.into_inner();

    let payment = sqlx::query_as::<_, Payment>(
        "UPDATE payments SET \
           status = $1, \
           paid_date = CASE WHEN $1 = 'paid' THEN now() ELSE paid_date END, \
           updated_at = now() \
         WHERE id = $2 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.status)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("payment"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "payment", Some(id))
            .with_details(json!({ "status": payload.status })),
    );
    Ok(HttpResponse::Ok().json(payment))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result = sqlx::query(
        "UPDATE payments SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(ctx.db.conn())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("payment"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "payment", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

pub async fn receipt(
    state: web::Data<AppState>,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let payment = fetch(&mut ctx, path.into_inner()).await?;
    if payment.status != payment_status::PAID {
        return Err(ApiError::validation("receipts are only available for paid transactions"));
    }

    let patient = patients::fetch(&mut ctx, payment.patient_id).await?;
    let clinic: (String,) = sqlx::query_as("SELECT name FROM public.tenants WHERE id = $1")
        .bind(ctx.auth.tenant_id())
        .fetch_one(state.db.pool())
        .await?;

    let bytes = payment_receipt_pdf(&clinic.0, &payment, &patient)?;
    Ok(pdf_response(bytes, &format!("receipt_{}.pdf", payment.id)))
}

#[derive(Debug, Deserialize)]
pub struct CashFlowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Income/expense totals (paid and pending) for a period.
pub async fn cash_flow(
    mut ctx: TenantContext,
    query: web::Query<CashFlowQuery>,
) -> Result<HttpResponse, ApiError> {
    let row: (Decimal, Decimal, Decimal, Decimal) = sqlx::query_as(
        "SELECT \
           coalesce(sum(amount) FILTER (WHERE kind = 'income' AND status = 'paid'), 0), \
           coalesce(sum(amount) FILTER (WHERE kind = 'expense' AND status = 'paid'), 0), \
           coalesce(sum(amount) FILTER (WHERE kind = 'income' AND status = 'pending'), 0), \
           coalesce(sum(amount) FILTER (WHERE kind = 'income' AND status = 'overdue'), 0) \
         FROM payments \
         WHERE deleted_at IS NULL \
           AND ($1::timestamptz IS NULL OR coalesce(paid_date, due_date, created_at) >= $1) \
           AND ($2::timestamptz IS NULL OR coalesce(paid_date, due_date, created_at) < $2)",
    )
    .bind(query.from)
    .bind(query.to)
    .fetch_one(ctx.db.conn())
    .await?;

    let (income, expense, pending, overdue) = row;
    Ok(HttpResponse::Ok().json(json!({
        "income": income,
        "expense": expense,
        "net": income - expense,
        "pending": pending,
        "overdue": overdue,
    })))
}

/// Count and total of income past its due date. Also flips stale pending rows
/// to overdue so listings stay honest.
pub async fn overdue_summary(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    sqlx::query(
        "UPDATE payments SET status = 'overdue', updated_at = now() \
         WHERE deleted_at IS NULL AND status = 'pending' \
           AND kind = 'income' AND due_date < now()",
    )
    .execute(ctx.db.conn())
    .await?;

    let row: (i64, Decimal) = sqlx::query_as(
        "SELECT count(*), coalesce(sum(amount), 0) FROM payments \
         WHERE deleted_at IS NULL AND status = 'overdue'",
    )
    .fetch_one(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "count": row.0, "total": row.1 })))
}

pub async fn export_csv(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    query: web::Query<PaymentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let sql = format!(
        "SELECT * FROM payments WHERE {LIST_WHERE} ORDER BY coalesce(due_date, created_at)"
    );
    let payments = sqlx::query_as::<_, Payment>(&sql)
        .bind(query.patient_id)
        .bind(query.budget_id)
        .bind(&query.status)
        .bind(&query.kind)
        .bind(query.from)
        .bind(query.to)
        .fetch_all(ctx.db.conn())
        .await?;

    let bytes = export_payments(&payments)?;
    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "payment", None),
    );
    Ok(csv_response(bytes, "payments.csv"))
}
