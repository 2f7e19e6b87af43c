//! Inventory products.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::{csv_response, Pagination};
use crate::audit::{self, AuditEntry};
use crate::documents::csv::{export_products, parse_products, ImportReport};
use crate::error::ApiError;
use crate::models::Product;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProductListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub search: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub supplier_id: Option<i64>,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default)]
    pub minimum_stock: i32,
    pub unit: Option<String>,
    pub cost_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub expiration_date: Option<NaiveDate>,
    pub barcode: Option<String>,
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<ProductListQuery>,
) -> Result<HttpResponse, ApiError> {
    let search = query.search.as_deref().map(|s| format!("%{}%", s.trim()));
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products \
         WHERE deleted_at IS NULL \
           AND ($1::text IS NULL OR name ILIKE $1 OR code ILIKE $1 OR barcode ILIKE $1) \
           AND ($2::text IS NULL OR category = $2) \
           AND ($3::boolean IS NULL OR active = $3) \
         ORDER BY name \
         LIMIT $4 OFFSET $5",
    )
    .bind(&search)
    .bind(&query.category)
    .bind(query.active)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": products })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let product = fetch(&mut ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(product))
}

pub(crate) async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Product, ApiError> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(ctx.db.conn())
        .await?
        .ok_or(ApiError::NotFound("product"))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<ProductPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;

    let product = sqlx::query_as::<_, Product>(
        "INSERT INTO products \
           (name, code, description, category, supplier_id, quantity, minimum_stock, unit, \
            cost_price, sale_price, expiration_date, barcode, active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, TRUE) \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.code)
    .bind(&payload.description)
    .bind(&payload.category)
    .bind(payload.supplier_id)
    .bind(payload.quantity)
    .bind(payload.minimum_stock)
    .bind(&payload.unit)
    .bind(payload.cost_price)
    .bind(payload.sale_price)
    .bind(payload.expiration_date)
    .bind(&payload.barcode)
    .fetch_one(ctx.db.conn())
    .await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "product", Some(product.id)),
    );
    Ok(HttpResponse::Created().json(product))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<ProductPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let id = path.into_inner();

    // quantity changes only through stock movements
    let product = sqlx::query_as::<_, Product>(
        "UPDATE products SET \
           name = $1, code = $2, description = $3, category = $4, supplier_id = $5, \
           minimum_stock = $6, unit = $7, cost_price = $8, sale_price = $9, \
           expiration_date = $10, barcode = $11, updated_at = now() \
         WHERE id = $12 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.code)
    .bind(&payload.description)
    .bind(&payload.category)
    .bind(payload.supplier_id)
    .bind(payload.minimum_stock)
    .bind(&payload.unit)
    .bind(payload.cost_price)
    .bind(payload.sale_price)
    .bind(payload.expiration_date)
    .bind(&payload.barcode)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("product"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "product", Some(id)),
    );
    Ok(HttpResponse::Ok().json(product))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result = sqlx::query(
        "UPDATE products SET deleted_at = now(), active = FALSE \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(ctx.db.conn())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("product"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "product", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

/// Products at or below their minimum stock.
pub async fn low_stock(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products \
         WHERE deleted_at IS NULL AND active AND quantity <= minimum_stock \
         ORDER BY quantity - minimum_stock",
    )
    .fetch_all(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": products })))
}

pub async fn export_csv(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
) -> Result<HttpResponse, ApiError> {
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE deleted_at IS NULL ORDER BY name",
    )
    .fetch_all(ctx.db.conn())
    .await?;

    let bytes = export_products(&products)?;
    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::EXPORT, "product", None),
    );
    Ok(csv_response(bytes, "products.csv"))
}

/// CSV import; duplicates by code are skipped.
pub async fn import_csv(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let outcome = parse_products(&body)?;

    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut errors = outcome.errors;

    for row in outcome.rows {
        if let Some(code) = row.code.as_deref() {
            let dup: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM products WHERE code = $1 AND deleted_at IS NULL")
                    .bind(code)
                    .fetch_optional(ctx.db.conn())
                    .await?;
            if dup.is_some() {
                skipped += 1;
                continue;
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO products \
               (name, code, category, quantity, minimum_stock, unit, cost_price, sale_price, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)",
        )
        .bind(&row.name)
        .bind(&row.code)
        .bind(&row.category)
        .bind(row.quantity)
        .bind(row.minimum_stock)
        .bind(&row.unit)
        .bind(row.cost_price)
        .bind(row.sale_price)
        .execute(ctx.db.conn())
        .await;

        match inserted {
            Ok(_) => imported += 1,
            Err(err) => errors.push(format!("{}: {err}", row.name)),
        }
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "product_import", None)
            .with_details(json!({ "imported": imported, "skipped": skipped })),
    );
    Ok(HttpResponse::Ok().json(ImportReport { imported, skipped, errors }))
}
