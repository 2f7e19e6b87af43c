//! Stock movements. Applying one updates the product quantity in the same
//! transaction; an exit below zero is refused.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use sqlx::Connection;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::Pagination;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::inventory::{movement_kind, quantity_delta, StockMovement};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MovementListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub product_id: Option<i64>,
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MovementPayload {
    pub product_id: i64,
    #[validate(length(min = 1))]
    pub kind: String,
    pub quantity: i32,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<MovementListQuery>,
) -> Result<HttpResponse, ApiError> {
    let movements = sqlx::query_as::<_, StockMovement>(
        "SELECT * FROM stock_movements \
         WHERE deleted_at IS NULL \
           AND ($1::bigint IS NULL OR product_id = $1) \
           AND ($2::text IS NULL OR kind = $2) \
         ORDER BY created_at DESC \
         LIMIT $3 OFFSET $4",
    )
    .bind(query.product_id)
    .bind(&query.kind)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": movements })))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<MovementPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    if !movement_kind::is_valid(&payload.kind) {
        return Err(ApiError::validation(format!("unknown movement kind: {}", payload.kind)));
    }
    if payload.kind != movement_kind::ADJUSTMENT && payload.quantity <= 0 {
        return Err(ApiError::validation("quantity must be positive"));
    }

    let delta = quantity_delta(&payload.kind, payload.quantity);
    let user_id = ctx.auth.user_id();

    let mut tx = ctx.db.conn().begin().await?;

    // Row lock so concurrent movements serialize per product.
    let current: Option<(i32,)> = sqlx::query_as(
        "SELECT quantity FROM products \
         WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(payload.product_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((quantity,)) = current else {
        return Err(ApiError::NotFound("product"));
    };

    let new_quantity = quantity + delta;
    if new_quantity < 0 {
        return Err(ApiError::Conflict(format!(
            "movement would leave stock at {new_quantity}, only {quantity} in stock"
        )));
    }

    let movement = sqlx::query_as::<_, StockMovement>(
        "INSERT INTO stock_movements (product_id, kind, quantity, reason, user_id, notes) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(payload.product_id)
    .bind(&payload.kind)
    .bind(payload.quantity)
    .bind(&payload.reason)
    .bind(user_id)
    .bind(&payload.notes)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE products SET quantity = $1, updated_at = now() WHERE id = $2")
        .bind(new_quantity)
        .bind(payload.product_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(
            &req,
            &ctx.auth,
            audit::action::CREATE,
            "stock_movement",
            Some(movement.id),
        )
        .with_details(json!({ "product_id": payload.product_id, "delta": delta })),
    );
    Ok(HttpResponse::Created().json(json!({
        "movement": movement,
        "product_quantity": new_quantity,
    })))
}

/// Movement totals grouped by kind.
pub async fn stats(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT kind, count(*), coalesce(sum(quantity), 0) \
         FROM stock_movements \
         WHERE deleted_at IS NULL \
         GROUP BY kind",
    )
    .fetch_all(ctx.db.conn())
    .await?;

    let stats: Vec<_> = rows
        .into_iter()
        .map(|(kind, count, total_quantity)| {
            json!({ "kind": kind, "count": count, "total_quantity": total_quantity })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "data": stats })))
}
