//! Embedded database schema.

use sqlx::PgPool;

use super::StoreError;

const SCHEMA: &str = include_str!("../../migrations/0001_ledgerflow.sql");

/// Apply the schema. Every statement is idempotent, so this runs on each start.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| StoreError::backend(format!("applying schema: {e}")))?;
    Ok(())
}

/// Map SQLx errors to `StoreError`.
///
/// | SQLx error | Postgres code | StoreError |
/// |------------|---------------|------------|
/// | unique violation on `idempotency_keys` | `23505` | `DuplicateKey` |
/// | unique violation on `accounts_document_key` | `23505` | `DuplicateDocument` |
/// | any other unique violation | `23505` | `Conflict` |
/// | check / foreign key violation | `23514` / `23503` | `Conflict` |
/// | anything else | | `Backend` |
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            let constraint = db_err.constraint().unwrap_or_default().to_string();

            match db_err.code().as_deref() {
                Some("23505") if constraint == "idempotency_keys_pkey" => {
                    StoreError::DuplicateKey(msg)
                }
                Some("23505") if constraint == "accounts_document_key" => {
                    StoreError::DuplicateDocument(msg)
                }
                Some("23505") | Some("23514") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::backend(format!("sqlx error in {operation}: {other}")),
    }
}

pub(crate) fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::backend(format!("{what} out of range: {value}")))
}

pub(crate) fn to_u64(value: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::backend(format!("{what} out of range: {value}")))
}
