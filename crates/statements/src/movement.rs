use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountNumber, DomainError, MovementId};

/// Direction of money relative to the account a movement belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(DomainError::invalid_value(format!(
                "unknown movement direction: {other}"
            ))),
        }
    }
}

/// One append-only row of an account's projected history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub direction: Direction,
    pub account_number: AccountNumber,
    pub value: i64,
    /// The other side of a transfer; `None` for deposits.
    pub counterparty: Option<AccountNumber>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn deposit(account_number: AccountNumber, value: i64, at: DateTime<Utc>) -> Self {
        Self {
            id: MovementId::new(),
            direction: Direction::In,
            account_number,
            value,
            counterparty: None,
            created_at: at,
        }
    }

    pub fn transfer_out(
        account_number: AccountNumber,
        counterparty: AccountNumber,
        value: i64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            direction: Direction::Out,
            account_number,
            value,
            counterparty: Some(counterparty),
            created_at: at,
        }
    }

    pub fn transfer_in(
        account_number: AccountNumber,
        counterparty: AccountNumber,
        value: i64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            direction: Direction::In,
            account_number,
            value,
            counterparty: Some(counterparty),
            created_at: at,
        }
    }
}
