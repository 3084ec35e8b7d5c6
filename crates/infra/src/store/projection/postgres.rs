//! Postgres-backed projection store.
//!
//! `apply` claims the event id in `processed_events` inside the same
//! transaction as the effects, so a redelivered event changes nothing.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use ledgerflow_core::{
    AccountName, AccountNumber, Document, EventId, MovementId, StatementGenerationId,
};
use ledgerflow_statements::{MirroredAccount, Movement, StatementGeneration};

use super::{ApplyOutcome, ProjectionChange, ProjectionStore};
use crate::store::StoreError;
use crate::store::schema::{map_sqlx_error, to_i64, to_u64};

const GENERATION_COLUMNS: &str =
    "id, account_number, status, created_at, finished_at, error, content";

/// Postgres-backed projection store.
///
/// Same threading rule as the ledger store: block on `runtime` from plain
/// threads only.
#[derive(Debug, Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresProjectionStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    async fn account_async(
        &self,
        number: AccountNumber,
    ) -> Result<Option<MirroredAccount>, StoreError> {
        let row = sqlx::query(
            "SELECT number, document, name, balance FROM mirrored_accounts WHERE number = $1",
        )
        .bind(to_i64(number.value(), "account number")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_mirrored_account", e))?;

        row.map(|r| mirrored_from_row(&r)).transpose()
    }

    async fn movements_async(&self, number: AccountNumber) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, direction, account_number, value, counterparty_number, created_at
            FROM movements
            WHERE account_number = $1
            ORDER BY created_at ASC, position ASC
            "#,
        )
        .bind(to_i64(number.value(), "account number")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    #[instrument(skip(self, change), fields(event_id = %event_id), err)]
    async fn apply_async(
        &self,
        event_id: EventId,
        change: ProjectionChange,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let claimed = sqlx::query(
            "INSERT INTO processed_events (event_id) VALUES ($1) ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(*event_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_event", e))?;

        if claimed.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Ok(ApplyOutcome::Duplicate);
        }

        match &change {
            ProjectionChange::CreateAccount(account) => {
                sqlx::query(
                    r#"
                    INSERT INTO mirrored_accounts (number, document, name, balance)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(to_i64(account.number().value(), "account number")?)
                .bind(account.document().as_str())
                .bind(account.name().as_str())
                .bind(account.balance())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_mirrored_account", e))?;
            }
            ProjectionChange::UpdateAccount { account, movement } => {
                let updated =
                    sqlx::query("UPDATE mirrored_accounts SET balance = $2 WHERE number = $1")
                        .bind(to_i64(account.number().value(), "account number")?)
                        .bind(account.balance())
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("update_mirrored_account", e))?;

                if updated.rows_affected() == 0 {
                    return Err(StoreError::NotFound(format!(
                        "mirrored account {}",
                        account.number()
                    )));
                }

                let counterparty = movement
                    .counterparty
                    .map(|n| to_i64(n.value(), "counterparty number"))
                    .transpose()?;

                sqlx::query(
                    r#"
                    INSERT INTO movements (id, direction, account_number, value, counterparty_number, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(*movement.id.as_uuid())
                .bind(movement.direction.as_str())
                .bind(to_i64(movement.account_number.value(), "account number")?)
                .bind(movement.value)
                .bind(counterparty)
                .bind(movement.created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_movement", e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(ApplyOutcome::Applied)
    }

    async fn has_running_generation_async(
        &self,
        number: AccountNumber,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM statement_generations
                WHERE account_number = $1 AND status = 'running'
            )
            "#,
        )
        .bind(to_i64(number.value(), "account number")?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_running_generation", e))?;
        Ok(exists)
    }

    async fn insert_generation_async(
        &self,
        generation: &StatementGeneration,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO statement_generations (id, account_number, status, created_at, finished_at, error, content)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*generation.id().as_uuid())
        .bind(to_i64(generation.account_number().value(), "account number")?)
        .bind(generation.status().as_str())
        .bind(generation.created_at())
        .bind(generation.finished_at())
        .bind(generation.error())
        .bind(generation.content())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_generation", e))?;
        Ok(())
    }

    async fn generation_async(
        &self,
        id: StatementGenerationId,
    ) -> Result<Option<StatementGeneration>, StoreError> {
        let sql = format!("SELECT {GENERATION_COLUMNS} FROM statement_generations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_generation", e))?;

        row.map(|r| generation_from_row(&r)).transpose()
    }

    async fn finish_generation_async(
        &self,
        generation: &StatementGeneration,
    ) -> Result<(), StoreError> {
        if generation.is_running() {
            return Err(StoreError::Conflict(format!(
                "statement generation {} is not in a terminal state",
                generation.id()
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE statement_generations
            SET status = $2, finished_at = $3, error = $4, content = $5
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(*generation.id().as_uuid())
        .bind(generation.status().as_str())
        .bind(generation.finished_at())
        .bind(generation.error())
        .bind(generation.content())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_generation", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.generation_async(generation.id()).await? {
            Some(stored) => Err(StoreError::Conflict(format!(
                "statement generation {} is already {}",
                stored.id(),
                stored.status()
            ))),
            None => Err(StoreError::NotFound(format!(
                "statement generation {}",
                generation.id()
            ))),
        }
    }

    async fn running_generations_before_async(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatementGeneration>, StoreError> {
        let sql = format!(
            "SELECT {GENERATION_COLUMNS} FROM statement_generations \
             WHERE status = 'running' AND created_at < $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_overdue_generations", e))?;

        rows.iter().map(generation_from_row).collect()
    }
}

fn number_from(value: i64) -> Result<AccountNumber, StoreError> {
    AccountNumber::new(to_u64(value, "account number")?)
        .map_err(|e| StoreError::backend(e.to_string()))
}

fn mirrored_from_row(row: &PgRow) -> Result<MirroredAccount, StoreError> {
    let read =
        |e: sqlx::Error| StoreError::backend(format!("failed to read mirrored account row: {e}"));

    let document = Document::parse(row.try_get::<String, _>("document").map_err(read)?)
        .map_err(|e| StoreError::backend(e.to_string()))?;
    let name = AccountName::parse(row.try_get::<String, _>("name").map_err(read)?)
        .map_err(|e| StoreError::backend(e.to_string()))?;

    Ok(MirroredAccount::restore(
        number_from(row.try_get("number").map_err(read)?)?,
        document,
        name,
        row.try_get("balance").map_err(read)?,
    ))
}

fn movement_from_row(row: &PgRow) -> Result<Movement, StoreError> {
    let read = |e: sqlx::Error| StoreError::backend(format!("failed to read movement row: {e}"));

    let direction = row
        .try_get::<String, _>("direction")
        .map_err(read)?
        .parse()
        .map_err(|e: ledgerflow_core::DomainError| StoreError::backend(e.to_string()))?;
    let counterparty = row
        .try_get::<Option<i64>, _>("counterparty_number")
        .map_err(read)?
        .map(number_from)
        .transpose()?;

    Ok(Movement {
        id: MovementId::from_uuid(row.try_get("id").map_err(read)?),
        direction,
        account_number: number_from(row.try_get("account_number").map_err(read)?)?,
        value: row.try_get("value").map_err(read)?,
        counterparty,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}

fn generation_from_row(row: &PgRow) -> Result<StatementGeneration, StoreError> {
    let read =
        |e: sqlx::Error| StoreError::backend(format!("failed to read statement generation: {e}"));

    let status = row
        .try_get::<String, _>("status")
        .map_err(read)?
        .parse()
        .map_err(|e: ledgerflow_core::DomainError| StoreError::backend(e.to_string()))?;

    Ok(StatementGeneration::restore(
        StatementGenerationId::from_uuid(row.try_get("id").map_err(read)?),
        number_from(row.try_get("account_number").map_err(read)?)?,
        status,
        row.try_get("created_at").map_err(read)?,
        row.try_get("finished_at").map_err(read)?,
        row.try_get("error").map_err(read)?,
        row.try_get("content").map_err(read)?,
    ))
}

impl ProjectionStore for PostgresProjectionStore {
    fn account(&self, number: AccountNumber) -> Result<Option<MirroredAccount>, StoreError> {
        self.block_on(self.account_async(number))
    }

    fn movements(&self, number: AccountNumber) -> Result<Vec<Movement>, StoreError> {
        self.block_on(self.movements_async(number))
    }

    fn apply(
        &self,
        event_id: EventId,
        change: ProjectionChange,
    ) -> Result<ApplyOutcome, StoreError> {
        self.block_on(self.apply_async(event_id, change))
    }

    fn has_running_generation(&self, number: AccountNumber) -> Result<bool, StoreError> {
        self.block_on(self.has_running_generation_async(number))
    }

    fn insert_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
        self.block_on(self.insert_generation_async(generation))
    }

    fn generation(
        &self,
        id: StatementGenerationId,
    ) -> Result<Option<StatementGeneration>, StoreError> {
        self.block_on(self.generation_async(id))
    }

    fn finish_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
        self.block_on(self.finish_generation_async(generation))
    }

    fn running_generations_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatementGeneration>, StoreError> {
        self.block_on(self.running_generations_before_async(cutoff))
    }
}
