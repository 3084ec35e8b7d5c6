//! Persistence: ledger store (accounts, idempotency keys, outbox) and
//! projection store (mirrored accounts, movements, statement jobs).
//!
//! Store traits are synchronous and `Send + Sync`; the Postgres
//! implementations drive `sqlx` through a captured tokio runtime handle.

pub mod ledger;
pub mod projection;
pub mod schema;

use thiserror::Error;

pub use ledger::{
    AccountWrite, IdempotencyRecord, InMemoryLedgerStore, LedgerMutation, LedgerStore,
    OutboxEntry, PostgresLedgerStore,
};
pub use projection::{
    ApplyOutcome, InMemoryProjectionStore, PostgresProjectionStore, ProjectionChange,
    ProjectionStore,
};
pub use schema::migrate;

/// Store operation error.
///
/// These are infrastructure errors; services translate the ones with domain
/// meaning (duplicate key, duplicate document, conflict) into their own error
/// kinds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The idempotency key was already recorded.
    #[error("idempotency key already recorded: {0}")]
    DuplicateKey(String),

    /// Another account already uses this document.
    #[error("document already in use: {0}")]
    DuplicateDocument(String),

    /// Optimistic concurrency or uniqueness conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Backend failure (connection, lock poisoning, malformed row).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

pub(crate) fn poisoned<T>(_: T) -> StoreError {
    StoreError::backend("lock poisoned")
}
