//! Ledger mutation service and the outbox relay that publishes its events.
//!
//! A mutation never talks to the bus. Each operation validates, applies the
//! change to the `Account` entities and hands the store one
//! [`LedgerMutation`] carrying the new balances, the sealed events and the
//! idempotency key. The [`OutboxRelay`] publishes committed events afterwards.

mod relay;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use ledgerflow_accounts::Account;
use ledgerflow_core::{
    AccountId, AccountName, AccountNumber, Document, DomainError, EventId, IdempotencyKey,
};
use ledgerflow_events::{
    AccountCreated, EventEnvelope, FundsDeposited, LedgerEvent, TransferRealized,
    TransferReceived,
};

use crate::store::{AccountWrite, LedgerMutation, LedgerStore, StoreError};

pub use relay::{OutboxRelay, RelayError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    #[error("document already in use")]
    DocumentInUse,

    #[error("account not found")]
    AccountNotFound,

    #[error("from account not found")]
    FromAccountNotFound,

    #[error("to account not found")]
    ToAccountNotFound,

    /// The idempotency key was already used.
    #[error("request already processed")]
    AlreadyProcessed,

    /// An account changed between read and commit; the caller may retry.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidAccount(msg) => LedgerError::InvalidAccount(msg),
            DomainError::InvalidValue(msg) | DomainError::InvalidId(msg) => {
                LedgerError::InvalidValue(msg)
            }
            DomainError::InsufficientFunds {
                requested,
                available,
            } => LedgerError::InsufficientFunds {
                requested,
                available,
            },
            DomainError::Conflict(msg) => LedgerError::Concurrency(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(_) => LedgerError::AlreadyProcessed,
            StoreError::DuplicateDocument(_) => LedgerError::DocumentInUse,
            StoreError::Conflict(msg) => LedgerError::Concurrency(msg),
            other => LedgerError::Store(other),
        }
    }
}

/// Identity of a freshly created account.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CreatedAccount {
    pub id: AccountId,
    pub number: AccountNumber,
}

/// Account creation, deposits and transfers.
#[derive(Debug, Clone)]
pub struct LedgerService<S> {
    store: S,
}

impl<S> LedgerService<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Open an account with balance 0 and emit `AccountCreated`.
    ///
    /// Name and document are validated before the store is touched.
    #[instrument(skip(self, document, name), err)]
    pub fn create_account(&self, document: &str, name: &str) -> Result<CreatedAccount, LedgerError> {
        let name = AccountName::parse(name)?;
        let document = Document::parse(document)?;

        if self.store.account_by_document(&document)?.is_some() {
            return Err(LedgerError::DocumentInUse);
        }

        let number = self.store.next_account_number()?;
        let now = Utc::now();
        let account = Account::open(AccountId::new(), number, document.clone(), name.clone(), now);
        let id = account.id();

        let event = LedgerEvent::AccountCreated(AccountCreated {
            number,
            name,
            document,
        });

        self.store.commit(LedgerMutation {
            writes: vec![AccountWrite::Insert(account)],
            events: vec![seal(&event, now)?],
            idempotency_key: None,
            at: now,
        })?;

        info!(account_number = %number, account_id = %id, "account created");
        Ok(CreatedAccount { id, number })
    }

    /// Credit `value` to an account, at most once per `key`.
    #[instrument(skip(self, key), fields(account_number = %number, idempotency_key = %key), err)]
    pub fn deposit(
        &self,
        number: AccountNumber,
        value: i64,
        key: &IdempotencyKey,
    ) -> Result<(), LedgerError> {
        self.ensure_unused(key)?;

        let mut account = self
            .store
            .account_by_number(number)?
            .ok_or(LedgerError::AccountNotFound)?;

        let now = Utc::now();
        account.deposit(value, now)?;

        let event = LedgerEvent::FundsDeposited(FundsDeposited { number, value });

        self.store.commit(LedgerMutation {
            writes: vec![AccountWrite::update(account)],
            events: vec![seal(&event, now)?],
            idempotency_key: Some(key.clone()),
            at: now,
        })?;

        info!(value, "funds deposited");
        Ok(())
    }

    /// Move `value` from `from` to `to`, at most once per `key`.
    ///
    /// Both balances are committed together, receiver first. Emits
    /// `TransferRealized` then `TransferReceived`; both carry the sender's new
    /// balance in `balance`, and `TransferReceived` adds the receiver's in
    /// `toBalance`.
    #[instrument(skip(self, key), fields(idempotency_key = %key), err)]
    pub fn transfer(
        &self,
        from: AccountNumber,
        to: AccountNumber,
        value: i64,
        key: &IdempotencyKey,
    ) -> Result<(), LedgerError> {
        self.ensure_unused(key)?;

        let mut sender = self
            .store
            .account_by_number(from)?
            .ok_or(LedgerError::FromAccountNotFound)?;
        let mut receiver = self
            .store
            .account_by_number(to)?
            .ok_or(LedgerError::ToAccountNotFound)?;

        let now = Utc::now();
        sender.transfer(value, &mut receiver, now)?;

        let realized = LedgerEvent::TransferRealized(TransferRealized {
            from_number: from,
            to_number: to,
            value,
            balance: sender.balance(),
        });
        let received = LedgerEvent::TransferReceived(TransferReceived {
            from_number: to,
            to_number: from,
            value,
            balance: sender.balance(),
            to_balance: Some(receiver.balance()),
        });

        self.store.commit(LedgerMutation {
            writes: vec![AccountWrite::update(receiver), AccountWrite::update(sender)],
            events: vec![seal(&realized, now)?, seal(&received, now)?],
            idempotency_key: Some(key.clone()),
            at: now,
        })?;

        info!(value, "transfer committed");
        Ok(())
    }

    pub fn get_account(&self, number: AccountNumber) -> Result<Option<Account>, LedgerError> {
        Ok(self.store.account_by_number(number)?)
    }

    fn ensure_unused(&self, key: &IdempotencyKey) -> Result<(), LedgerError> {
        match self.store.idempotency_key(key)? {
            Some(_) => Err(LedgerError::AlreadyProcessed),
            None => Ok(()),
        }
    }
}

fn seal(event: &LedgerEvent, at: DateTime<Utc>) -> Result<EventEnvelope, LedgerError> {
    EventEnvelope::seal_at(EventId::new(), at, event)
        .map_err(|e| LedgerError::Store(StoreError::backend(format!("sealing event: {e}"))))
}
