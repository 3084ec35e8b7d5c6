//! Ledger-side persistence: accounts, idempotency keys and the event outbox.

mod in_memory;
mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ledgerflow_accounts::Account;
use ledgerflow_core::{AccountNumber, Document, ExpectedVersion, IdempotencyKey};
use ledgerflow_events::EventEnvelope;

use super::StoreError;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// One account row written by a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountWrite {
    /// A new account; fails if its number or document is taken.
    Insert(Account),
    /// A changed account; fails if the stored revision does not match `expected`.
    Update {
        account: Account,
        expected: ExpectedVersion,
    },
}

impl AccountWrite {
    pub fn update(account: Account) -> Self {
        let expected = ExpectedVersion::Exact(account.version());
        Self::Update { account, expected }
    }
}

/// Everything one ledger operation writes, committed atomically.
///
/// Account writes are applied in order, the envelopes are appended to the
/// outbox, and the idempotency key (if any) is recorded as pending. If any
/// part fails nothing is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMutation {
    pub writes: Vec<AccountWrite>,
    pub events: Vec<EventEnvelope>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub at: DateTime<Utc>,
}

/// An event waiting in (or relayed from) the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Commit order; relays publish in ascending sequence.
    pub sequence: u64,
    pub envelope: EventEnvelope,
    pub idempotency_key: Option<IdempotencyKey>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A recorded idempotency key.
///
/// Recorded (pending) when the mutation commits; confirmed once every outbox
/// row written with it has been published. Both states block a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

pub trait LedgerStore: Send + Sync {
    /// Claim the next account number from a monotonic sequence. Never reused.
    fn next_account_number(&self) -> Result<AccountNumber, StoreError>;

    fn account_by_number(&self, number: AccountNumber) -> Result<Option<Account>, StoreError>;

    fn account_by_document(&self, document: &Document) -> Result<Option<Account>, StoreError>;

    fn idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Atomically apply a mutation.
    ///
    /// Errors: `DuplicateKey`, `DuplicateDocument`, `Conflict` (stale version
    /// or taken number), `NotFound` (updated account vanished), `Backend`.
    fn commit(&self, mutation: LedgerMutation) -> Result<(), StoreError>;

    /// Unpublished outbox rows in commit order.
    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Mark one outbox row published, confirming its idempotency key when it
    /// was the key's last pending row.
    fn mark_published(&self, sequence: u64, at: DateTime<Utc>) -> Result<(), StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn next_account_number(&self) -> Result<AccountNumber, StoreError> {
        (**self).next_account_number()
    }

    fn account_by_number(&self, number: AccountNumber) -> Result<Option<Account>, StoreError> {
        (**self).account_by_number(number)
    }

    fn account_by_document(&self, document: &Document) -> Result<Option<Account>, StoreError> {
        (**self).account_by_document(document)
    }

    fn idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        (**self).idempotency_key(key)
    }

    fn commit(&self, mutation: LedgerMutation) -> Result<(), StoreError> {
        (**self).commit(mutation)
    }

    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        (**self).pending_outbox(limit)
    }

    fn mark_published(&self, sequence: u64, at: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).mark_published(sequence, at)
    }
}
