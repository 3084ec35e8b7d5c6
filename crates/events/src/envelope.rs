//! Wire envelope for ledger events.
//!
//! On the wire an envelope is a JSON object:
//!
//! ```text
//! {"id":"<uuid>","type":"FundsDeposited","version":1,"occurredAt":"<rfc3339>","data":"<payload json>"}
//! ```
//!
//! `data` is the payload serialized as a JSON *string*, so a consumer can read
//! `type` and decide whether it cares before decoding anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerflow_core::EventId;

use crate::event::{Event, EventTag, LedgerEvent, Topic};
use crate::routing::Routable;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_version() -> u32 {
    1
}

/// A published event: identity + type tag + timestamp + opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default = "Utc::now")]
    occurred_at: DateTime<Utc>,
    data: String,
}

impl EventEnvelope {
    /// Wrap an event with a fresh id, stamped now.
    pub fn seal(event: &LedgerEvent) -> Result<Self, EnvelopeError> {
        Self::seal_at(EventId::new(), Utc::now(), event)
    }

    pub fn seal_at(
        id: EventId,
        occurred_at: DateTime<Utc>,
        event: &LedgerEvent,
    ) -> Result<Self, EnvelopeError> {
        let data = event.payload_json().map_err(|source| EnvelopeError::Payload {
            event_type: event.event_type().to_string(),
            source,
        })?;

        Ok(Self {
            id,
            event_type: event.event_type().to_string(),
            version: event.version(),
            occurred_at,
            data,
        })
    }

    /// Rebuild an envelope from stored columns without re-encoding the payload.
    pub fn from_parts(
        id: EventId,
        event_type: impl Into<String>,
        version: u32,
        occurred_at: DateTime<Utc>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            version,
            occurred_at,
            data: data.into(),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn tag(&self) -> Result<EventTag, EnvelopeError> {
        self.event_type
            .parse()
            .map_err(EnvelopeError::UnknownType)
    }

    /// Decode the payload into a typed event.
    pub fn open(&self) -> Result<LedgerEvent, EnvelopeError> {
        let tag = self.tag()?;
        LedgerEvent::from_payload(tag, &self.data).map_err(|source| EnvelopeError::Payload {
            event_type: self.event_type.clone(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl Routable for EventEnvelope {
    fn routing_key(&self) -> &str {
        &self.event_type
    }

    fn topic(&self) -> Option<Topic> {
        self.tag().ok().map(|tag| tag.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{FundsDeposited, TransferReceived};
    use ledgerflow_core::AccountNumber;

    fn deposit() -> LedgerEvent {
        FundsDeposited {
            number: AccountNumber::new(1).unwrap(),
            value: 100,
        }
        .into()
    }

    #[test]
    fn sealed_envelope_opens_to_same_event() {
        let envelope = EventEnvelope::seal(&deposit()).unwrap();

        assert_eq!(envelope.event_type(), "FundsDeposited");
        assert_eq!(envelope.version(), 1);
        assert_eq!(envelope.data(), r#"{"number":"1","value":100}"#);
        assert_eq!(envelope.open().unwrap(), deposit());
    }

    #[test]
    fn wire_json_keeps_data_as_string() {
        let envelope = EventEnvelope::seal(&deposit()).unwrap();
        let raw = envelope.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "FundsDeposited");
        assert!(value["data"].is_string());
        assert!(value["occurredAt"].is_string());

        assert_eq!(EventEnvelope::from_json(&raw).unwrap(), envelope);
    }

    #[test]
    fn minimal_producer_envelope_is_accepted() {
        let raw = format!(
            r#"{{"id":"{}","type":"TransferReceived","data":"{{\"fromNumber\":\"2\",\"toNumber\":\"1\",\"value\":25,\"balance\":75}}"}}"#,
            EventId::new()
        );
        let envelope = EventEnvelope::from_json(&raw).unwrap();

        assert_eq!(envelope.version(), 1);
        match envelope.open().unwrap() {
            LedgerEvent::TransferReceived(TransferReceived { value, balance, .. }) => {
                assert_eq!((value, balance), (25, 75));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_reported_not_guessed() {
        let envelope =
            EventEnvelope::from_parts(EventId::new(), "AccountClosed", 1, Utc::now(), "{}");

        assert!(matches!(envelope.open(), Err(EnvelopeError::UnknownType(t)) if t == "AccountClosed"));
        assert_eq!(envelope.topic(), None);
        assert_eq!(envelope.routing_key(), "AccountClosed");
    }

    #[test]
    fn malformed_payload_names_the_event_type() {
        let envelope =
            EventEnvelope::from_parts(EventId::new(), "FundsDeposited", 1, Utc::now(), "{\"value\":");

        assert!(matches!(
            envelope.open(),
            Err(EnvelopeError::Payload { event_type, .. }) if event_type == "FundsDeposited"
        ));
    }
}
