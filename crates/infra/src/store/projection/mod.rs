//! Statement-side persistence: mirrored accounts, movement history, processed
//! event ids and statement generation jobs.

mod in_memory;
mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ledgerflow_core::{AccountNumber, EventId, StatementGenerationId};
use ledgerflow_statements::{MirroredAccount, Movement, StatementGeneration};

use super::StoreError;

pub use in_memory::InMemoryProjectionStore;
pub use postgres::PostgresProjectionStore;

/// The effect of one consumed event on the read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionChange {
    /// Mirror a newly created account; fails with `Conflict` if it exists.
    CreateAccount(MirroredAccount),
    /// Store the new balance and append the movement that explains it.
    UpdateAccount {
        account: MirroredAccount,
        movement: Movement,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The event id was already processed; nothing changed.
    Duplicate,
}

pub trait ProjectionStore: Send + Sync {
    fn account(&self, number: AccountNumber) -> Result<Option<MirroredAccount>, StoreError>;

    /// Movement history of an account, oldest first.
    fn movements(&self, number: AccountNumber) -> Result<Vec<Movement>, StoreError>;

    /// Atomically record `event_id` as processed and apply `change`.
    fn apply(&self, event_id: EventId, change: ProjectionChange)
    -> Result<ApplyOutcome, StoreError>;

    fn has_running_generation(&self, number: AccountNumber) -> Result<bool, StoreError>;

    /// Insert a new running job; `Conflict` if the account already has one.
    fn insert_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError>;

    fn generation(
        &self,
        id: StatementGenerationId,
    ) -> Result<Option<StatementGeneration>, StoreError>;

    /// Persist a job's terminal state. Only a stored job that is still running
    /// can be finished: otherwise `Conflict` (or `NotFound`).
    fn finish_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError>;

    /// Running jobs created before `cutoff`.
    fn running_generations_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatementGeneration>, StoreError>;
}

impl<S> ProjectionStore for Arc<S>
where
    S: ProjectionStore + ?Sized,
{
    fn account(&self, number: AccountNumber) -> Result<Option<MirroredAccount>, StoreError> {
        (**self).account(number)
    }

    fn movements(&self, number: AccountNumber) -> Result<Vec<Movement>, StoreError> {
        (**self).movements(number)
    }

    fn apply(
        &self,
        event_id: EventId,
        change: ProjectionChange,
    ) -> Result<ApplyOutcome, StoreError> {
        (**self).apply(event_id, change)
    }

    fn has_running_generation(&self, number: AccountNumber) -> Result<bool, StoreError> {
        (**self).has_running_generation(number)
    }

    fn insert_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
        (**self).insert_generation(generation)
    }

    fn generation(
        &self,
        id: StatementGenerationId,
    ) -> Result<Option<StatementGeneration>, StoreError> {
        (**self).generation(id)
    }

    fn finish_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
        (**self).finish_generation(generation)
    }

    fn running_generations_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatementGeneration>, StoreError> {
        (**self).running_generations_before(cutoff)
    }
}
