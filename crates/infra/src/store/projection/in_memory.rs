use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use ledgerflow_core::{AccountNumber, EventId, StatementGenerationId};
use ledgerflow_statements::{MirroredAccount, Movement, StatementGeneration};

use super::{ApplyOutcome, ProjectionChange, ProjectionStore};
use crate::store::{StoreError, poisoned};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountNumber, MirroredAccount>,
    movements: Vec<Movement>,
    processed: HashSet<EventId>,
    generations: HashMap<StatementGenerationId, StatementGeneration>,
}

/// In-memory projection store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    tables: RwLock<Tables>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn account(&self, number: AccountNumber) -> Result<Option<MirroredAccount>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.accounts.get(&number).cloned())
    }

    fn movements(&self, number: AccountNumber) -> Result<Vec<Movement>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut movements: Vec<Movement> = tables
            .movements
            .iter()
            .filter(|m| m.account_number == number)
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order.
        movements.sort_by_key(|m| m.created_at);
        Ok(movements)
    }

    fn apply(
        &self,
        event_id: EventId,
        change: ProjectionChange,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if tables.processed.contains(&event_id) {
            return Ok(ApplyOutcome::Duplicate);
        }

        match change {
            ProjectionChange::CreateAccount(account) => {
                if tables.accounts.contains_key(&account.number()) {
                    return Err(StoreError::Conflict(format!(
                        "mirrored account {} already exists",
                        account.number()
                    )));
                }
                tables.accounts.insert(account.number(), account);
            }
            ProjectionChange::UpdateAccount { account, movement } => {
                let slot = tables
                    .accounts
                    .get_mut(&account.number())
                    .ok_or_else(|| StoreError::NotFound(format!("mirrored account {}", account.number())))?;
                *slot = account;
                tables.movements.push(movement);
            }
        }

        tables.processed.insert(event_id);
        Ok(ApplyOutcome::Applied)
    }

    fn has_running_generation(&self, number: AccountNumber) -> Result<bool, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .generations
            .values()
            .any(|g| g.account_number() == number && g.is_running()))
    }

    fn insert_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let number = generation.account_number();
        if tables
            .generations
            .values()
            .any(|g| g.account_number() == number && g.is_running())
        {
            return Err(StoreError::Conflict(format!(
                "account {number} already has a running statement generation"
            )));
        }
        if tables.generations.contains_key(&generation.id()) {
            return Err(StoreError::Conflict(format!(
                "statement generation {} already exists",
                generation.id()
            )));
        }
        tables.generations.insert(generation.id(), generation.clone());
        Ok(())
    }

    fn generation(
        &self,
        id: StatementGenerationId,
    ) -> Result<Option<StatementGeneration>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.generations.get(&id).cloned())
    }

    fn finish_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
        if generation.is_running() {
            return Err(StoreError::Conflict(format!(
                "statement generation {} is not in a terminal state",
                generation.id()
            )));
        }

        let mut tables = self.tables.write().map_err(poisoned)?;
        let stored = tables
            .generations
            .get_mut(&generation.id())
            .ok_or_else(|| StoreError::NotFound(format!("statement generation {}", generation.id())))?;

        if !stored.is_running() {
            return Err(StoreError::Conflict(format!(
                "statement generation {} is already {}",
                stored.id(),
                stored.status()
            )));
        }
        *stored = generation.clone();
        Ok(())
    }

    fn running_generations_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatementGeneration>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .generations
            .values()
            .filter(|g| g.is_overdue(cutoff))
            .cloned()
            .collect())
    }
}
