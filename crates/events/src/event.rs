use core::str::FromStr;

use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountName, AccountNumber, Document, StatementGenerationId};

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name on the wire (e.g. "FundsDeposited").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;
}

/// Per-domain channel an event is published on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Account,
    Statement,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Account => "account",
            Topic::Statement => "statement",
        }
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of event names that may appear in an envelope `type` field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventTag {
    AccountCreated,
    FundsDeposited,
    TransferRealized,
    TransferReceived,
    StatementGenerationRequested,
}

impl EventTag {
    pub const ALL: [EventTag; 5] = [
        EventTag::AccountCreated,
        EventTag::FundsDeposited,
        EventTag::TransferRealized,
        EventTag::TransferReceived,
        EventTag::StatementGenerationRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::AccountCreated => "AccountCreated",
            EventTag::FundsDeposited => "FundsDeposited",
            EventTag::TransferRealized => "TransferRealized",
            EventTag::TransferReceived => "TransferReceived",
            EventTag::StatementGenerationRequested => "StatementGenerationRequested",
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            EventTag::StatementGenerationRequested => Topic::Statement,
            _ => Topic::Account,
        }
    }
}

impl core::fmt::Display for EventTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Event: a ledger account was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub number: AccountNumber,
    pub name: AccountName,
    pub document: Document,
}

/// Event: funds were deposited into an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsDeposited {
    pub number: AccountNumber,
    pub value: i64,
}

/// Event: the sender side of a transfer.
///
/// `balance` is the sender's balance after the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRealized {
    pub from_number: AccountNumber,
    pub to_number: AccountNumber,
    pub value: i64,
    pub balance: i64,
}

/// Event: the receiver side of a transfer.
///
/// Like `TransferRealized`, the first number names the account the event is
/// about: `from_number` is the *receiving* account and `to_number` the sender.
/// `balance` repeats the sender's post-transfer balance, exactly as
/// `TransferRealized` carries it. The receiver's own post-transfer balance is
/// in `to_balance`, which older producers did not send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceived {
    pub from_number: AccountNumber,
    pub to_number: AccountNumber,
    pub value: i64,
    pub balance: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_balance: Option<i64>,
}

/// Event: a statement generation job was admitted and awaits rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementGenerationRequested {
    pub id: StatementGenerationId,
    pub account_number: AccountNumber,
}

/// Every event the ledger and statement services exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    AccountCreated(AccountCreated),
    FundsDeposited(FundsDeposited),
    TransferRealized(TransferRealized),
    TransferReceived(TransferReceived),
    StatementGenerationRequested(StatementGenerationRequested),
}

impl LedgerEvent {
    pub fn tag(&self) -> EventTag {
        match self {
            LedgerEvent::AccountCreated(_) => EventTag::AccountCreated,
            LedgerEvent::FundsDeposited(_) => EventTag::FundsDeposited,
            LedgerEvent::TransferRealized(_) => EventTag::TransferRealized,
            LedgerEvent::TransferReceived(_) => EventTag::TransferReceived,
            LedgerEvent::StatementGenerationRequested(_) => {
                EventTag::StatementGenerationRequested
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.tag().topic()
    }

    /// Serialize only the payload (the envelope's `data` field).
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            LedgerEvent::AccountCreated(e) => serde_json::to_string(e),
            LedgerEvent::FundsDeposited(e) => serde_json::to_string(e),
            LedgerEvent::TransferRealized(e) => serde_json::to_string(e),
            LedgerEvent::TransferReceived(e) => serde_json::to_string(e),
            LedgerEvent::StatementGenerationRequested(e) => serde_json::to_string(e),
        }
    }

    /// Decode a payload previously produced by [`LedgerEvent::payload_json`].
    pub fn from_payload(tag: EventTag, data: &str) -> Result<Self, serde_json::Error> {
        Ok(match tag {
            EventTag::AccountCreated => LedgerEvent::AccountCreated(serde_json::from_str(data)?),
            EventTag::FundsDeposited => LedgerEvent::FundsDeposited(serde_json::from_str(data)?),
            EventTag::TransferRealized => {
                LedgerEvent::TransferRealized(serde_json::from_str(data)?)
            }
            EventTag::TransferReceived => {
                LedgerEvent::TransferReceived(serde_json::from_str(data)?)
            }
            EventTag::StatementGenerationRequested => {
                LedgerEvent::StatementGenerationRequested(serde_json::from_str(data)?)
            }
        })
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        self.tag().as_str()
    }

    fn version(&self) -> u32 {
        1
    }
}

impl From<AccountCreated> for LedgerEvent {
    fn from(value: AccountCreated) -> Self {
        LedgerEvent::AccountCreated(value)
    }
}

impl From<FundsDeposited> for LedgerEvent {
    fn from(value: FundsDeposited) -> Self {
        LedgerEvent::FundsDeposited(value)
    }
}

impl From<TransferRealized> for LedgerEvent {
    fn from(value: TransferRealized) -> Self {
        LedgerEvent::TransferRealized(value)
    }
}

impl From<TransferReceived> for LedgerEvent {
    fn from(value: TransferReceived) -> Self {
        LedgerEvent::TransferReceived(value)
    }
}

impl From<StatementGenerationRequested> for LedgerEvent {
    fn from(value: StatementGenerationRequested) -> Self {
        LedgerEvent::StatementGenerationRequested(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(n: u64) -> AccountNumber {
        AccountNumber::new(n).unwrap()
    }

    #[test]
    fn account_created_payload_matches_wire_shape() {
        let event = LedgerEvent::AccountCreated(AccountCreated {
            number: number(1),
            name: AccountName::parse("name 1").unwrap(),
            document: Document::parse("01234567890").unwrap(),
        });

        assert_eq!(
            event.payload_json().unwrap(),
            r#"{"number":"1","name":"name 1","document":"01234567890"}"#
        );
        assert_eq!(event.event_type(), "AccountCreated");
        assert_eq!(event.topic(), Topic::Account);
    }

    #[test]
    fn transfer_received_decodes_without_receiver_balance() {
        let data = r#"{"fromNumber":"2","toNumber":"1","value":25,"balance":75}"#;
        let event = LedgerEvent::from_payload(EventTag::TransferReceived, data).unwrap();

        match event {
            LedgerEvent::TransferReceived(e) => {
                assert_eq!(e.balance, 75);
                assert_eq!(e.to_balance, None);
                assert_eq!(e.from_number, number(2));
                assert_eq!(e.to_number, number(1));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn statement_requests_route_to_statement_topic() {
        assert_eq!(EventTag::StatementGenerationRequested.topic(), Topic::Statement);
        assert_eq!(
            "StatementGenerationRequested".parse::<EventTag>(),
            Ok(EventTag::StatementGenerationRequested)
        );
        assert_eq!("Nope".parse::<EventTag>(), Err("Nope".to_string()));
    }
}
