use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, AccountName, AccountNumber, DomainError, DomainResult, Document};

/// A ledger account: the authoritative balance, in minor currency units.
///
/// The balance is never negative. `version` is the persisted revision the
/// account was loaded at; it is not bumped by the mutators below, the store
/// assigns the next revision when the change is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    number: AccountNumber,
    document: Document,
    name: AccountName,
    balance: i64,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Account {
    /// A freshly opened account with a zero balance.
    pub fn open(
        id: AccountId,
        number: AccountNumber,
        document: Document,
        name: AccountName,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number,
            document,
            name,
            balance: 0,
            version: 0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Rebuild an account from persisted state.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: AccountId,
        number: AccountNumber,
        document: Document,
        name: AccountName,
        balance: i64,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if balance < 0 {
            return Err(DomainError::invalid_value(format!(
                "account {number} persisted with negative balance {balance}"
            )));
        }
        Ok(Self {
            id,
            number,
            document,
            name,
            balance,
            version,
            created_at,
            updated_at,
        })
    }

    /// The same account at persisted revision `version`; stores call this after a write.
    pub fn at_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn number(&self) -> AccountNumber {
        self.number
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn name(&self) -> &AccountName {
        &self.name
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Credit `value`. Zero and negative values are rejected.
    pub fn deposit(&mut self, value: i64, at: DateTime<Utc>) -> DomainResult<()> {
        ensure_positive(value)?;
        let balance = self
            .balance
            .checked_add(value)
            .ok_or_else(|| DomainError::invalid_value("balance overflow"))?;
        self.balance = balance;
        self.updated_at = at;
        Ok(())
    }

    /// Debit `value`; fails without touching the balance if it is not covered.
    pub fn withdraw(&mut self, value: i64, at: DateTime<Utc>) -> DomainResult<()> {
        ensure_positive(value)?;
        if value > self.balance {
            return Err(DomainError::insufficient_funds(value, self.balance));
        }
        self.balance -= value;
        self.updated_at = at;
        Ok(())
    }

    /// Move `value` from this account to `to`.
    ///
    /// Either both balances change or neither does.
    pub fn transfer(&mut self, value: i64, to: &mut Account, at: DateTime<Utc>) -> DomainResult<()> {
        if self.number == to.number {
            return Err(DomainError::invalid_value(
                "cannot transfer to the same account",
            ));
        }
        // Probe the credit first so a failing deposit cannot follow a committed debit.
        to.balance
            .checked_add(value)
            .ok_or_else(|| DomainError::invalid_value("balance overflow"))?;

        self.withdraw(value, at)?;
        to.deposit(value, at)
    }
}

fn ensure_positive(value: i64) -> DomainResult<()> {
    if value <= 0 {
        return Err(DomainError::invalid_value(format!(
            "value must be greater than zero, got {value}"
        )));
    }
    Ok(())
}
