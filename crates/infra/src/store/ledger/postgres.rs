//! Postgres-backed ledger store.
//!
//! `commit` runs in one transaction: idempotency key insert (the primary key
//! makes concurrent replays fail), account inserts/updates guarded by
//! `version`, then outbox inserts. Account numbers come from
//! `account_number_seq`.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;

use ledgerflow_accounts::Account;
use ledgerflow_core::{
    AccountId, AccountName, AccountNumber, Document, EventId, ExpectedVersion, IdempotencyKey,
};
use ledgerflow_events::EventEnvelope;

use super::{AccountWrite, IdempotencyRecord, LedgerMutation, LedgerStore, OutboxEntry};
use crate::store::StoreError;
use crate::store::schema::{map_sqlx_error, to_i64, to_u64};

/// Postgres-backed ledger store.
///
/// Store calls block on `runtime`; call them from plain threads, never from
/// inside that runtime's async tasks.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    async fn select_account(
        &self,
        column: &'static str,
        bind: AccountLookup<'_>,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT number, id, document, name, balance, version, created_at, updated_at \
             FROM accounts WHERE {column} = $1"
        );
        let query = sqlx::query(&sql);
        let query = match bind {
            AccountLookup::Number(n) => query.bind(to_i64(n.value(), "account number")?),
            AccountLookup::Document(d) => query.bind(d.as_str().to_string()),
        };

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_account", e))?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    async fn next_account_number_async(&self) -> Result<AccountNumber, StoreError> {
        let value: i64 = sqlx::query_scalar("SELECT nextval('account_number_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("next_account_number", e))?;
        AccountNumber::new(to_u64(value, "account number")?)
            .map_err(|e| StoreError::backend(e.to_string()))
    }

    async fn idempotency_key_async(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query("SELECT created_at, confirmed_at FROM idempotency_keys WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_idempotency_key", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = |e: sqlx::Error| StoreError::backend(format!("failed to read key row: {e}"));
        Ok(Some(IdempotencyRecord {
            key: key.clone(),
            created_at: row.try_get("created_at").map_err(read)?,
            confirmed_at: row.try_get("confirmed_at").map_err(read)?,
        }))
    }

    async fn pending_outbox_async(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, event_id, event_type, event_version, occurred_at, data,
                   idempotency_key, published_at
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY sequence ASC
            LIMIT $1
            "#,
        )
        .bind(to_i64(limit as u64, "outbox limit")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_outbox", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self, mutation), fields(writes = mutation.writes.len(), events = mutation.events.len()), err)]
    async fn commit_async(&self, mutation: LedgerMutation) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(key) = &mutation.idempotency_key {
            sqlx::query("INSERT INTO idempotency_keys (key, created_at) VALUES ($1, $2)")
                .bind(key.as_str())
                .bind(mutation.at)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_idempotency_key", e))?;
        }

        for write in &mutation.writes {
            match write {
                AccountWrite::Insert(account) => insert_account(&mut tx, account).await?,
                AccountWrite::Update { account, expected } => {
                    update_account(&mut tx, account, *expected).await?
                }
            }
        }

        for envelope in &mutation.events {
            sqlx::query(
                r#"
                INSERT INTO outbox (event_id, event_type, event_version, occurred_at, data, idempotency_key)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(*envelope.id().as_uuid())
            .bind(envelope.event_type())
            .bind(envelope.version() as i32)
            .bind(envelope.occurred_at())
            .bind(envelope.data())
            .bind(mutation.idempotency_key.as_ref().map(|k| k.as_str().to_string()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_outbox", e))?;
        }

        if let Some(key) = &mutation.idempotency_key {
            if mutation.events.is_empty() {
                confirm_key(&mut tx, key.as_str(), mutation.at).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn mark_published_async(&self, sequence: u64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            UPDATE outbox SET published_at = COALESCE(published_at, $2)
            WHERE sequence = $1
            RETURNING idempotency_key
            "#,
        )
        .bind(to_i64(sequence, "outbox sequence")?)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_published", e))?
        .ok_or_else(|| StoreError::NotFound(format!("outbox row {sequence}")))?;

        let key: Option<String> = row
            .try_get("idempotency_key")
            .map_err(|e| StoreError::backend(format!("reading idempotency_key: {e}")))?;

        if let Some(key) = key {
            let pending: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM outbox WHERE idempotency_key = $1 AND published_at IS NULL",
            )
            .bind(&key)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("count_pending", e))?;

            if pending == 0 {
                confirm_key(&mut tx, &key, at).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

enum AccountLookup<'a> {
    Number(AccountNumber),
    Document(&'a Document),
}

async fn insert_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO accounts (number, id, document, name, balance, version, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
        "#,
    )
    .bind(to_i64(account.number().value(), "account number")?)
    .bind(*account.id().as_uuid())
    .bind(account.document().as_str())
    .bind(account.name().as_str())
    .bind(account.balance())
    .bind(account.created_at())
    .bind(account.updated_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_account", e))?;
    Ok(())
}

async fn update_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let number = to_i64(account.number().value(), "account number")?;
    let expected_version = match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(to_i64(v, "account version")?),
    };

    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET balance = $2, updated_at = $3, version = version + 1
        WHERE number = $1 AND ($4::BIGINT IS NULL OR version = $4)
        "#,
    )
    .bind(number)
    .bind(account.balance())
    .bind(account.updated_at())
    .bind(expected_version)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_account", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "account {}: expected {expected:?} did not match",
            account.number()
        )));
    }
    Ok(())
}

async fn confirm_key(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE idempotency_keys SET confirmed_at = COALESCE(confirmed_at, $2) WHERE key = $1",
    )
    .bind(key)
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("confirm_key", e))?;
    Ok(())
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<Account, StoreError> {
    let read = |e: sqlx::Error| StoreError::backend(format!("failed to read account row: {e}"));

    let number = AccountNumber::new(to_u64(row.try_get("number").map_err(read)?, "account number")?)
        .map_err(|e| StoreError::backend(e.to_string()))?;
    let document = Document::parse(row.try_get::<String, _>("document").map_err(read)?)
        .map_err(|e| StoreError::backend(e.to_string()))?;
    let name = AccountName::parse(row.try_get::<String, _>("name").map_err(read)?)
        .map_err(|e| StoreError::backend(e.to_string()))?;

    Account::restore(
        AccountId::from_uuid(row.try_get("id").map_err(read)?),
        number,
        document,
        name,
        row.try_get("balance").map_err(read)?,
        to_u64(row.try_get("version").map_err(read)?, "account version")?,
        row.try_get("created_at").map_err(read)?,
        row.try_get("updated_at").map_err(read)?,
    )
    .map_err(|e| StoreError::backend(e.to_string()))
}

fn outbox_from_row(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, StoreError> {
    let read = |e: sqlx::Error| StoreError::backend(format!("failed to read outbox row: {e}"));

    let version: i32 = row.try_get("event_version").map_err(read)?;
    let envelope = EventEnvelope::from_parts(
        EventId::from_uuid(row.try_get("event_id").map_err(read)?),
        row.try_get::<String, _>("event_type").map_err(read)?,
        u32::try_from(version).map_err(|_| StoreError::backend("negative event version"))?,
        row.try_get("occurred_at").map_err(read)?,
        row.try_get::<String, _>("data").map_err(read)?,
    );
    let idempotency_key = row
        .try_get::<Option<String>, _>("idempotency_key")
        .map_err(read)?
        .map(IdempotencyKey::parse)
        .transpose()
        .map_err(|e| StoreError::backend(e.to_string()))?;

    Ok(OutboxEntry {
        sequence: to_u64(row.try_get("sequence").map_err(read)?, "outbox sequence")?,
        envelope,
        idempotency_key,
        published_at: row.try_get("published_at").map_err(read)?,
    })
}

impl LedgerStore for PostgresLedgerStore {
    fn next_account_number(&self) -> Result<AccountNumber, StoreError> {
        self.block_on(self.next_account_number_async())
    }

    fn account_by_number(&self, number: AccountNumber) -> Result<Option<Account>, StoreError> {
        self.block_on(self.select_account("number", AccountLookup::Number(number)))
    }

    fn account_by_document(&self, document: &Document) -> Result<Option<Account>, StoreError> {
        self.block_on(self.select_account("document", AccountLookup::Document(document)))
    }

    fn idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.block_on(self.idempotency_key_async(key))
    }

    fn commit(&self, mutation: LedgerMutation) -> Result<(), StoreError> {
        self.block_on(self.commit_async(mutation))
    }

    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.block_on(self.pending_outbox_async(limit))
    }

    fn mark_published(&self, sequence: u64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.block_on(self.mark_published_async(sequence, at))
    }
}
