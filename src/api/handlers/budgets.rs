//! Treatment budgets. Item lines are JSONB; the stored total is always
//! recomputed server-side from the lines.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::{csv_response, patients, pdf_response, Pagination};
use crate::audit::{self, AuditEntry};
use crate::documents::csv::export_budgets;
use crate::documents::pdf::budget_pdf;
use crate::error::ApiError;
use crate::models::billing::{budget_status, items_total, Budget, BudgetItem};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BudgetListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub patient_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BudgetPayload {
    pub patient_id: i64,
    pub dentist_id: i64,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "budget needs at least one item"))]
    pub items: Vec<BudgetItem>,
    pub valid_until: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusPatch {
    pub status: String,
}

fn validate_items(items: &[BudgetItem]) -> Result<(), ApiError> {
    for item in items {
        if item.procedure.trim().is_empty() {
            return Err(ApiError::validation("item procedure must not be empty"));
        }
        if item.quantity == 0 {
            return Err(ApiError::validation("item quantity must be at least 1"));
        }
        if item.unit_value.is_sign_negative() {
            return Err(ApiError::validation("item unit_value must not be negative"));
        }
    }
    Ok(())
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<BudgetListQuery>,
) -> Result<HttpResponse, ApiError> {
    let budgets = sqlx::query_as::<_, Budget>(
        "SELECT * FROM budgets \
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

    Ok(HttpResponse::Ok().json(json!({ "data": budgets })))
}

pub async fn export_csv(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    query: web::Query<BudgetListQuery>,
) -> Result<HttpResponse, ApiError> {
    let budgets = sqlx::query_as::<_, Budget>(
        "SELECT * FROM budgets \
         WHERE deleted_at IS NULL \
           AND ($1::bigint IS NULL OR patient_id = $1) \
           AND ($2::text IS NULL OR status = $2) \
         ORDER BY created_at DESC",
    )
    .bind(query.patient_id)
    .bind(&query.status)
    .fetch_all(ctx.db.conn())
    .await?;

    let bytes = export_budgets(&budgets)?;
    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "budget", None),
    );
    Ok(csv_response(bytes, "orcamentos.csv"))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let budget = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(budget))
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Budget, ApiError> {
    sqlx::query_as::<_, Budget>("SELECT * FROM budgets WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(ctx.db.conn())
        .await?
        .ok_or(ApiError::NotFound("budget"))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<BudgetPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    validate_items(&payload.items)?;

    let total = items_total(&payload.items);
    let items_json = serde_json::to_value(&payload.items)
        .map_err(|e| ApiError::internal(format!("items serialization: {e}")))?;

    let budget = sqlx::query_as::<_, Budget>(
        "INSERT INTO budgets \
           (patient_id, dentist_id, description, total_value, items, status, valid_until, notes) \
         VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7) \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(&payload.description)
    .bind(total)
    .bind(&items_json)
    .bind(payload.valid_until)
    .bind(&payload.notes)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "budget", Some(budget.id)),
    );
    Ok(HttpResponse::Created().json(budget))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<BudgetPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    validate_items(&payload.items)?;
    let id = path.into_inner();

    let existing = fetch(&mut ctx, id).await?;
    if existing.status != budget_status::PENDING {
        return Err(ApiError::Conflict(format!(
            "only pending budgets can be edited, current status is {}",
            existing.status
        )));
    }

    let total = items_total(&payload.items);
    let items_json = serde_json::to_value(&payload.items)
        .map_err(|e| ApiError::internal(format!("items serialization: {e}")))?;

    let budget = sqlx::query_as::<_, Budget>(
        "UPDATE budgets SET \
           patient_id = $1, dentist_id = $2, description = $3, total_value = $4, \
           items = $5, valid_until = $6, notes = $7, updated_at = now() \
         WHERE id = $8 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(payload.patient_id)
    .bind(payload.dentist_id)
    .bind(&payload.description)
    .bind(total)
    .bind(&items_json)
    .bind(payload.valid_until)
    .bind(&payload.notes)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("budget"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "budget", Some(id)),
    );
    Ok(HttpResponse::Ok().json(budget))
}

/// Allowed transitions: pending -> approved/rejected/expired/cancelled;
/// anything else only to cancelled.
pub async fn set_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<StatusPatch>,
) -> Result<HttpResponse, ApiError> {
    if !budget_status::is_valid(&payload.status) {
        return Err(ApiError::validation(format!("unknown status: {}", payload.status)));
    }
    let id = path.into_inner();

    let existing = fetch(&mut ctx, id).await?;
    let allowed = existing.status == budget_status::PENDING
        || payload.status == budget_status::CANCELLED;
    if !allowed {
        return Err(ApiError::Conflict(format!(
            "cannot move a {} budget to {}",
            existing.status, payload.status
        )));
    }

    let budget = sqlx::query_as::<_, Budget>(
        "UPDATE budgets SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(&payload.status)
    .bind(id)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "budget", Some(id))
            .with_details(json!({ "status": payload.status })),
    );
    Ok(HttpResponse::Ok().json(budget))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result = sqlx::query(
        "UPDATE budgets SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(ctx.db.conn())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("budget"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "budget", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

pub async fn pdf(
    state: web::Data<AppState>,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let budget = fetch(&mut ctx, path.into_inner()).await?;
    let patient = patients::fetch(&mut ctx, budget.patient_id).await?;

    let items: Vec<BudgetItem> = serde_json::from_value(budget.items.clone())
        .map_err(|e| ApiError::internal(format!("stored items are malformed: {e}")))?;

    let dentist: (String,) = sqlx::query_as("SELECT name FROM public.users WHERE id = $1")
        .bind(budget.dentist_id)
        .fetch_one(state.db.pool())
        .await?;
    let clinic: (String,) = sqlx::query_as("SELECT name FROM public.tenants WHERE id = $1")
        .bind(ctx.auth.tenant_id())
        .fetch_one(state.db.pool())
        .await?;

    let bytes = budget_pdf(&clinic.0, &budget, &items, &patient, &dentist.0)?;
    Ok(pdf_response(bytes, &format!("budget_{}.pdf", budget.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(procedure: &str, quantity: u32, unit_value: &str) -> BudgetItem {
        BudgetItem {
            procedure: procedure.into(),
            tooth: None,
            quantity,
            unit_value: unit_value.parse().unwrap(),
        }
    }

    #[test]
    fn items_with_zero_quantity_are_rejected() {
        assert!(validate_items(&[item("Cleaning", 0, "100.00")]).is_err());
    }

    #[test]
    fn items_with_negative_value_are_rejected() {
        assert!(validate_items(&[item("Cleaning", 1, "-1.00")]).is_err());
    }

    #[test]
    fn valid_items_pass() {
        assert!(validate_items(&[item("Cleaning", 2, "150.00")]).is_ok());
    }
}
