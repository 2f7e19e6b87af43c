//! Clinic tasks with responsible users.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::Connection;
use validator::Validate;

use crate::api::extract::TenantContext;
use crate::api::handlers::Pagination;
use crate::audit::{self, AuditEntry};
use crate::error::ApiError;
use crate::models::crm::{task_priority, task_status, Task};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub status: Option<String>,
    pub priority: Option<String>,
    /// Only tasks the given user is responsible for.
    pub assigned_to: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TaskPayload {
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: String,
    #[serde(default)]
    pub responsible_user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusPatch {
    pub status: String,
}

async fn fetch(ctx: &mut TenantContext, id: i64) -> Result<Task, ApiError> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(ctx.db.conn())
        .await?
        .ok_or(ApiError::NotFound("task"))
}

async fn responsible_ids(ctx: &mut TenantContext, task_id: i64) -> Result<Vec<i64>, ApiError> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT user_id FROM task_users WHERE task_id = $1 ORDER BY user_id")
            .bind(task_id)
            .fetch_all(ctx.db.conn())
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

fn task_json(task: &Task, responsible: &[i64]) -> serde_json::Value {
    let mut value = serde_json::to_value(task).unwrap_or_default();
    value["responsible_user_ids"] = json!(responsible);
    value
}

pub async fn list(
    mut ctx: TenantContext,
    query: web::Query<TaskListQuery>,
) -> Result<HttpResponse, ApiError> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* FROM tasks t \
         WHERE t.deleted_at IS NULL \
           AND ($1::text IS NULL OR t.status = $1) \
           AND ($2::text IS NULL OR t.priority = $2) \
           AND ($3::bigint IS NULL OR EXISTS \
                (SELECT 1 FROM task_users tu WHERE tu.task_id = t.id AND tu.user_id = $3)) \
         ORDER BY t.due_date NULLS LAST, t.created_at DESC \
         LIMIT $4 OFFSET $5",
    )
    .bind(&query.status)
    .bind(&query.priority)
    .bind(query.assigned_to)
    .bind(query.pagination.limit())
    .bind(query.pagination.offset())
    .fetch_all(ctx.db.conn())
    .await?;

    let mut data = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let responsible = responsible_ids(&mut ctx, task.id).await?;
        data.push(task_json(task, &responsible));
    }
    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}

pub async fn get(mut ctx: TenantContext, path: web::Path<i64>) -> Result<HttpResponse, ApiError> {
    let task = fetch(&mut ctx, path.into_inner()).await?;
    let responsible = responsible_ids(&mut ctx, task.id).await?;
    Ok(HttpResponse::Ok().json(task_json(&task, &responsible)))
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    payload: web::Json<TaskPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    if !task_priority::is_valid(&payload.priority) {
        return Err(ApiError::validation(format!("unknown priority: {}", payload.priority)));
    }

    let user_id = ctx.auth.user_id();
    let mut tx = ctx.db.conn().begin().await?;

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (title, description, due_date, priority, status, created_by) \
         VALUES ($1, $2, $3, $4, 'pending', $5) \
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.due_date)
    .bind(&payload.priority)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    for responsible in &payload.responsible_user_ids {
        sqlx::query("INSERT INTO task_users (task_id, user_id) VALUES ($1, $2)")
            .bind(task.id)
            .bind(responsible)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::CREATE, "task", Some(task.id)),
    );
    Ok(HttpResponse::Created().json(task_json(&task, &payload.responsible_user_ids)))
}

pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<TaskPayload>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    if !task_priority::is_valid(&payload.priority) {
        return Err(ApiError::validation(format!("unknown priority: {}", payload.priority)));
    }
    let id = path.into_inner();

    let mut tx = ctx.db.conn().begin().await?;

    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET \
           title = $1, description = $2, due_date = $3, priority = $4, updated_at = now() \
         WHERE id = $5 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.due_date)
    .bind(&payload.priority)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("task"))?;

    sqlx::query("DELETE FROM task_users WHERE task_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    for responsible in &payload.responsible_user_ids {
        sqlx::query("INSERT INTO task_users (task_id, user_id) VALUES ($1, $2)")
            .bind(id)
            .bind(responsible)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "task", Some(id)),
    );
    Ok(HttpResponse::Ok().json(task_json(&task, &payload.responsible_user_ids)))
}

pub async fn set_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
    payload: web::Json<StatusPatch>,
) -> Result<HttpResponse, ApiError> {
    if !task_status::is_valid(&payload.status) {
        return Err(ApiError::validation(format!("unknown status: {}", payload.status)));
    }
    let id = path.into_inner();

    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET status = $1, updated_at = now() \
         WHERE id = $2 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(&payload.status)
    .bind(id)
    .fetch_optional(ctx.db.conn())
    .await?
    .ok_or(ApiError::NotFound("task"))?;

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::UPDATE, "task", Some(id))
            .with_details(json!({ "status": payload.status })),
    );
    let responsible = responsible_ids(&mut ctx, task.id).await?;
    Ok(HttpResponse::Ok().json(task_json(&task, &responsible)))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut ctx: TenantContext,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let result =
        sqlx::query("UPDATE tasks SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(ctx.db.conn())
            .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("task"));
    }

    audit::record(
        state.db.pool(),
        AuditEntry::from_request(&req, &ctx.auth, audit::action::DELETE, "task", Some(id)),
    );
    Ok(HttpResponse::NoContent().finish())
}

/// Open tasks for the caller, shown as a badge in the UI.
pub async fn pending_count(mut ctx: TenantContext) -> Result<HttpResponse, ApiError> {
    let user_id = ctx.auth.user_id();
    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM tasks t \
         WHERE t.deleted_at IS NULL \
           AND t.status IN ('pending', 'in_progress') \
           AND (t.created_by = $1 OR EXISTS \
                (SELECT 1 FROM task_users tu WHERE tu.task_id = t.id AND tu.user_id = $1))",
    )
    .bind(user_id)
    .fetch_one(ctx.db.conn())
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "pending": row.0 })))
}
