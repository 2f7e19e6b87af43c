//! Tenant schema routing
//!
//! Every tenant's rows live in a dedicated PostgreSQL schema named
//! `tenant_<id>`; shared tables stay in `public`. A request-scoped
//! [`TenantDb`] holds a pooled connection whose `search_path` has been set to
//! `tenant_<id>, public`, so unqualified table names resolve inside the
//! tenant schema while `public.`-qualified queries still reach shared rows.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::error::ApiError;

/// DDL applied to every freshly created tenant schema.
const TENANT_SCHEMA_SQL: &str = include_str!("../../sql/tenant_schema.sql");

/// Returns the schema name for a tenant id.
pub fn schema_name(tenant_id: i64) -> String {
    format!("tenant_{tenant_id}")
}

/// Schema names are spliced into DDL/`SET search_path` statements, so they
/// must never contain anything beyond `[a-z0-9_]`.
pub fn is_valid_schema_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A database connection scoped to one tenant's schema.
pub struct TenantDb {
    conn: PoolConnection<Postgres>,
    pub tenant_id: i64,
    pub schema: String,
}

impl TenantDb {
    /// Acquire a connection from the pool and pin its `search_path` to the
    /// tenant schema. Fails closed on an invalid schema name.
    pub async fn acquire(pool: &PgPool, tenant_id: i64) -> Result<Self, ApiError> {
        let schema = schema_name(tenant_id);
        if !is_valid_schema_name(&schema) {
            return Err(ApiError::Forbidden("invalid tenant schema".into()));
        }

        let mut conn = pool.acquire().await.map_err(ApiError::Database)?;
        sqlx::query(&format!("SET search_path TO {schema}, public"))
            .execute(&mut *conn)
            .await?;

        Ok(Self { conn, tenant_id, schema })
    }

    /// Executor for sqlx queries.
    pub fn conn(&mut self) -> &mut sqlx::PgConnection {
        &mut self.conn
    }
}

/// Create a tenant schema and apply the tenant DDL.
///
/// The DDL file is a sequence of statements; they run inside a transaction so
/// a half-created schema never survives.
pub async fn create_tenant_schema(pool: &PgPool, tenant_id: i64) -> Result<(), ApiError> {
    let schema = schema_name(tenant_id);
    if !is_valid_schema_name(&schema) {
        return Err(ApiError::validation(format!("invalid schema name: {schema}")));
    }

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("SET LOCAL search_path TO {schema}, public"))
        .execute(&mut *tx)
        .await?;
    sqlx::raw_sql(TENANT_SCHEMA_SQL).execute(&mut *tx).await?;
    tx.commit().await?;

    tracing::info!(tenant_id, %schema, "tenant schema created");
    Ok(())
}

/// Drop a tenant schema and everything in it. Used when registration fails
/// partway and by permanent tenant deletion.
pub async fn drop_tenant_schema(pool: &PgPool, tenant_id: i64) -> Result<(), ApiError> {
    let schema = schema_name(tenant_id);
    if !is_valid_schema_name(&schema) {
        return Err(ApiError::validation(format!("invalid schema name: {schema}")));
    }
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
        .execute(pool)
        .await?;
    tracing::warn!(tenant_id, %schema, "tenant schema dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_name_is_derived_from_tenant_id() {
        assert_eq!(schema_name(5), "tenant_5");
        assert_eq!(schema_name(1042), "tenant_1042");
    }

    #[test]
    fn valid_schema_names() {
        assert!(is_valid_schema_name("tenant_1"));
        assert!(is_valid_schema_name("public"));
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(!is_valid_schema_name("tenant_1; DROP TABLE users"));
        assert!(!is_valid_schema_name("tenant-1"));
        assert!(!is_valid_schema_name("Tenant_1"));
        assert!(!is_valid_schema_name(""));
        assert!(!is_valid_schema_name("tenant_1 "));
    }
}
