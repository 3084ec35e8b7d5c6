use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use ledgerflow_accounts::Account;
use ledgerflow_core::{AccountNumber, Document, IdempotencyKey};

use super::{AccountWrite, IdempotencyRecord, LedgerMutation, LedgerStore, OutboxEntry};
use crate::store::{StoreError, poisoned};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountNumber, Account>,
    documents: HashMap<Document, AccountNumber>,
    keys: HashMap<IdempotencyKey, IdempotencyRecord>,
    /// Unpublished rows only, by sequence. Published rows are dropped.
    outbox: BTreeMap<u64, OutboxEntry>,
}

impl Tables {
    /// Reject the whole mutation before touching anything.
    fn check(&self, mutation: &LedgerMutation) -> Result<(), StoreError> {
        if let Some(key) = &mutation.idempotency_key {
            if self.keys.contains_key(key) {
                return Err(StoreError::DuplicateKey(key.to_string()));
            }
        }

        for write in &mutation.writes {
            match write {
                AccountWrite::Insert(account) => {
                    if self.documents.contains_key(account.document()) {
                        return Err(StoreError::DuplicateDocument(account.document().to_string()));
                    }
                    if self.accounts.contains_key(&account.number()) {
                        return Err(StoreError::Conflict(format!(
                            "account number {} already taken",
                            account.number()
                        )));
                    }
                }
                AccountWrite::Update { account, expected } => {
                    let current = self
                        .accounts
                        .get(&account.number())
                        .ok_or_else(|| StoreError::NotFound(format!("account {}", account.number())))?;
                    if !expected.matches(current.version()) {
                        return Err(StoreError::Conflict(format!(
                            "account {}: expected {expected:?}, found {}",
                            account.number(),
                            current.version()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn confirm_if_drained(&mut self, key: &IdempotencyKey, at: DateTime<Utc>) {
        let drained = !self
            .outbox
            .values()
            .any(|e| e.idempotency_key.as_ref() == Some(key));
        if drained {
            if let Some(record) = self.keys.get_mut(key) {
                record.confirmed_at.get_or_insert(at);
            }
        }
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. One lock guards every table, which is what makes
/// `commit` atomic.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
    next_number: AtomicU64,
    next_sequence: AtomicU64,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_number: AtomicU64::new(AccountNumber::FIRST.value()),
            next_sequence: AtomicU64::new(1),
        }
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn next_account_number(&self) -> Result<AccountNumber, StoreError> {
        let value = self.next_number.fetch_add(1, Ordering::SeqCst);
        AccountNumber::new(value).map_err(|e| StoreError::backend(e.to_string()))
    }

    fn account_by_number(&self, number: AccountNumber) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.accounts.get(&number).cloned())
    }

    fn account_by_document(&self, document: &Document) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .documents
            .get(document)
            .and_then(|number| tables.accounts.get(number))
            .cloned())
    }

    fn idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.keys.get(key).cloned())
    }

    fn commit(&self, mutation: LedgerMutation) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.check(&mutation)?;

        let LedgerMutation {
            writes,
            events,
            idempotency_key,
            at,
        } = mutation;

        for write in writes {
            match write {
                AccountWrite::Insert(account) => {
                    tables
                        .documents
                        .insert(account.document().clone(), account.number());
                    tables.accounts.insert(account.number(), account.at_version(1));
                }
                AccountWrite::Update { account, .. } => {
                    let version = tables
                        .accounts
                        .get(&account.number())
                        .map(|current| current.version() + 1)
                        .unwrap_or(1);
                    tables.accounts.insert(account.number(), account.at_version(version));
                }
            }
        }

        for envelope in events {
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            tables.outbox.insert(
                sequence,
                OutboxEntry {
                    sequence,
                    envelope,
                    idempotency_key: idempotency_key.clone(),
                    published_at: None,
                },
            );
        }

        if let Some(key) = idempotency_key {
            tables.keys.insert(
                key.clone(),
                IdempotencyRecord {
                    key: key.clone(),
                    created_at: at,
                    confirmed_at: None,
                },
            );
            tables.confirm_if_drained(&key, at);
        }

        Ok(())
    }

    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.outbox.values().take(limit).cloned().collect())
    }

    fn mark_published(&self, sequence: u64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        match tables.outbox.remove(&sequence) {
            Some(entry) => {
                if let Some(key) = entry.idempotency_key {
                    tables.confirm_if_drained(&key, at);
                }
                Ok(())
            }
            // Already published and pruned.
            None if sequence < self.next_sequence.load(Ordering::SeqCst) => Ok(()),
            None => Err(StoreError::NotFound(format!("outbox row {sequence}"))),
        }
    }
}
