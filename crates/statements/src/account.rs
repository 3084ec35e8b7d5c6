use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountName, AccountNumber, DomainError, DomainResult, Document};

/// Eventually-consistent copy of a ledger account, rebuilt only from events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredAccount {
    number: AccountNumber,
    document: Document,
    name: AccountName,
    balance: i64,
}

impl MirroredAccount {
    /// Mirror of a just-created account (balance 0).
    pub fn created(number: AccountNumber, document: Document, name: AccountName) -> Self {
        Self {
            number,
            document,
            name,
            balance: 0,
        }
    }

    pub fn restore(
        number: AccountNumber,
        document: Document,
        name: AccountName,
        balance: i64,
    ) -> Self {
        Self {
            number,
            document,
            name,
            balance,
        }
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

    /// Apply a deposit delta.
    pub fn credit(&mut self, value: i64) -> DomainResult<()> {
        self.balance = self
            .balance
            .checked_add(value)
            .ok_or_else(|| DomainError::invalid_value("mirrored balance overflow"))?;
        Ok(())
    }

    /// Overwrite the balance with an authoritative snapshot from the ledger.
    pub fn set_balance(&mut self, balance: i64) {
        self.balance = balance;
    }
}
