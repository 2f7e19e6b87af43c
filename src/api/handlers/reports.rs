//! Management reports: dashboard counters, the monthly revenue report in
//! JSON/PDF/XLSX and the overdue payments report.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::api::extract::TenantContext;
use crate::api::handlers::{pdf_response, xlsx_response};
use crate::audit::{self, AuditEntry};
use crate::documents::{pdf, xlsx, RevenueRow};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// json (default), pdf or xlsx.
    pub format: Option<String>,
}

async fn clinic_name(state: &AppState, tenant_id: i64) -> Result<String, ApiError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT name FROM public.tenants WHERE id = $1")
        .bind(tenant_id)
        .fetch_optional(state.db.pool())
        .await?;
    Ok(row.map(|(name,)| name).unwrap_or_default())
}

pub async fn dashboard(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    let (patients,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM patients WHERE deleted_at IS NULL AND active")
            .fetch_one(ctx.db.conn())
            .await?;

    let (appointments_today,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM appointments \
         WHERE deleted_at IS NULL \
           AND start_time::date = CURRENT_DATE \
           AND status NOT IN ('cancelled', 'no_show')",
    )
    .fetch_one(ctx.db.conn())
    .await?;

    let (pending_income, overdue_count, overdue_total): (Decimal, i64, Decimal) = sqlx::query_as(
        "SELECT coalesce(sum(amount) FILTER (WHERE status = 'pending' AND kind = 'income'), 0), \
                count(*) FILTER (WHERE status = 'overdue'), \
                coalesce(sum(amount) FILTER (WHERE status = 'overdue'), 0) \
         FROM payments WHERE deleted_at IS NULL",
    )
    .fetch_one(ctx.db.conn())
    .await?;

    let (low_stock,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM products \
         WHERE deleted_at IS NULL AND active AND quantity <= minimum_stock",
    )
    .fetch_one(ctx.db.conn())
    .await?;

    let (new_leads,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM leads WHERE deleted_at IS NULL AND status = 'new'")
            .fetch_one(ctx.db.conn())
            .await?;

    let (waiting,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM waiting_list WHERE deleted_at IS NULL AND status = 'waiting'",
    )
    .fetch_one(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "active_patients": patients,
        "appointments_today": appointments_today,
        "pending_income": pending_income,
        "overdue_count": overdue_count,
        "overdue_total": overdue_total,
        "low_stock_products": low_stock,
        "new_leads": new_leads,
        "waiting_list": waiting,
    })))
}

async fn revenue_rows(
    ctx: &mut TenantContext,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<RevenueRow>, ApiError> {
    let rows: Vec<(String, Decimal, Decimal)> = sqlx::query_as(
        "SELECT to_char(date_trunc('month', coalesce(paid_date, due_date, created_at)), 'YYYY-MM') AS month, \
                coalesce(sum(amount) FILTER (WHERE kind = 'income'), 0), \
                coalesce(sum(amount) FILTER (WHERE kind = 'expense'), 0) \
         FROM payments \
         WHERE deleted_at IS NULL \
           AND status = 'paid' \
           AND ($1::date IS NULL OR coalesce(paid_date, due_date, created_at)::date >= $1) \
           AND ($2::date IS NULL OR coalesce(paid_date, due_date, created_at)::date <= $2) \
         GROUP BY 1 \
         ORDER BY 1",
    )
    .bind(from)
    .bind(to)
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(rows
        .into_iter()
        .map(|(label, income, expense)| RevenueRow { label, income, expense })
        .collect())
}

fn period_label(from: Option<NaiveDate>, to: Option<NaiveDate>) -> String {
    match (from, to) {
        (Some(f), Some(t)) => format!("{} a {}", f.format("%d/%m/%Y"), t.format("%d/%m/%Y")),
        (Some(f), None) => format!("a partir de {}", f.format("%d/%m/%Y")),
        (None, Some(t)) => format!("até {}", t.format("%d/%m/%Y")),
        (None, None) => "todo o período".to_string(),
    }
}

pub async fn revenue(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    query: web::Query<RevenueQuery>,
) -> Result<HttpResponse, ApiError> {
    let rows = revenue_rows(&mut ctx, query.from, query.to).await?;
    let label = period_label(query.from, query.to);

    match query.format.as_deref() {
        None | Some("json") => {
            let total_income: Decimal = rows.iter().map(|r| r.income).sum();
            let total_expense: Decimal = rows.iter().map(|r| r.expense).sum();
            let months: Vec<_> = rows
                .iter()
                .map(|r| {
                    json!({
                        "month": r.label,
                        "income": r.income,
                        "expense": r.expense,
                        "net": r.net(),
                    })
                })
                .collect();
            Ok(HttpResponse::Ok().json(json!({
                "period": label,
                "months": months,
                "total_income": total_income,
                "total_expense": total_expense,
                "net": total_income - total_expense,
            })))
        }
        Some("pdf") => {
            let clinic = clinic_name(&state, ctx.db.tenant_id).await?;
            let bytes = pdf::revenue_report_pdf(&clinic, &label, &rows)?;
            audit::record(
                state.db.pool(),
                AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "report", None)
                    .with_details(json!({ "report": "revenue", "format": "pdf" })),
            );
            Ok(pdf_response(bytes, "relatorio-financeiro.pdf"))
        }
        Some("xlsx") => {
            let clinic = clinic_name(&state, ctx.db.tenant_id).await?;
            let bytes = xlsx::revenue_report_xlsx(&clinic, &label, &rows)?;
            audit::record(
                state.db.pool(),
                AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "report", None)
                    .with_details(json!({ "report": "revenue", "format": "xlsx" })),
            );
            Ok(xlsx_response(bytes, "relatorio-financeiro.xlsx"))
        }
        Some(other) => Err(ApiError::validation(format!("unknown format: {other}"))),
    }
}

/// Overdue income payments with patient names, oldest first.
pub async fn overdue(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    // Flip stale pending rows first so the report is current.
    sqlx::query(
        "UPDATE payments SET status = 'overdue', updated_at = now() \
         WHERE deleted_at IS NULL AND status = 'pending' AND kind = 'income' \
           AND due_date IS NOT NULL AND due_date < now()",
    )
    .execute(ctx.db.conn())
    .await?;

    #[derive(sqlx::FromRow, serde::Serialize)]
    struct OverdueRow {
        id: i64,
        patient_id: i64,
        patient_name: String,
        patient_phone: Option<String>,
        description: Option<String>,
        amount: Decimal,
        due_date: Option<chrono::DateTime<chrono::Utc>>,
    }

    let rows = sqlx::query_as::<_, OverdueRow>(
        "SELECT pay.id, pay.patient_id, pat.name AS patient_name, \
                coalesce(pat.cell_phone, pat.phone) AS patient_phone, \
                pay.description, pay.amount, pay.due_date \
         FROM payments pay \
         JOIN patients pat ON pat.id = pay.patient_id \
         WHERE pay.deleted_at IS NULL AND pay.status = 'overdue' \
         ORDER BY pay.due_date NULLS LAST",
    )
    .fetch_all(ctx.db.conn())
    .await?;

    let total: Decimal = rows.iter().map(|r| r.amount).sum();
    Ok(HttpResponse::Ok().json(json!({ "total": total, "count": rows.len(), "data": rows })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_label_variants() {
        let from = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert_eq!(period_label(Some(from), Some(to)), "01/05/2024 a 30/06/2024");
        assert_eq!(period_label(None, None), "todo o período");
        assert!(period_label(Some(from), None).starts_with("a partir de"));
    }
}
