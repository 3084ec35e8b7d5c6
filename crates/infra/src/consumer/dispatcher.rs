use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use ledgerflow_core::EventId;
use ledgerflow_events::{EnvelopeError, EventEnvelope};

use super::{EventHandler, Handled, HandlerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Handled {
        handler: &'static str,
        outcome: Handled,
    },
    /// Unknown type or no handler for the tag.
    Ignored,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("undecodable envelope {event_id}: {source}")]
    Undecodable {
        event_id: EventId,
        #[source]
        source: EnvelopeError,
    },

    #[error("handler {handler} failed: {source}")]
    Handler {
        handler: &'static str,
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Undecodable { .. } => false,
            DispatchError::Handler { source, .. } => source.is_transient(),
        }
    }
}

/// Decodes envelopes and routes each to the first handler accepting its tag.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn dispatch(&self, envelope: &EventEnvelope) -> Result<Dispatched, DispatchError> {
        let tag = match envelope.tag() {
            Ok(tag) => tag,
            Err(_) => {
                info!(
                    event_id = %envelope.id(),
                    event_type = envelope.event_type(),
                    "ignoring unknown event type"
                );
                return Ok(Dispatched::Ignored);
            }
        };

        let Some(handler) = self.handlers.iter().find(|h| h.accepts(tag)) else {
            debug!(event_id = %envelope.id(), event_type = %tag, "no handler for event");
            return Ok(Dispatched::Ignored);
        };

        let event = envelope
            .open()
            .map_err(|source| DispatchError::Undecodable {
                event_id: envelope.id(),
                source,
            })?;

        let outcome = handler
            .handle(envelope, &event)
            .map_err(|source| DispatchError::Handler {
                handler: handler.name(),
                source,
            })?;

        debug!(
            event_id = %envelope.id(),
            event_type = %tag,
            handler = handler.name(),
            outcome = ?outcome,
            "event handled"
        );
        Ok(Dispatched::Handled {
            handler: handler.name(),
            outcome,
        })
    }
}

impl core::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerflow_core::AccountNumber;
    use ledgerflow_events::{EventTag, FundsDeposited, LedgerEvent};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventTag>>,
    }

    impl EventHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn accepts(&self, tag: EventTag) -> bool {
            tag == EventTag::FundsDeposited
        }

        fn handle(
            &self,
            _envelope: &EventEnvelope,
            event: &LedgerEvent,
        ) -> Result<Handled, HandlerError> {
            self.seen.lock().unwrap().push(event.tag());
            Ok(Handled::Applied)
        }
    }

    #[test]
    fn routes_accepted_tags_and_ignores_the_rest() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = EventDispatcher::new().with_handler(recorder.clone());

        let deposit = EventEnvelope::seal(&LedgerEvent::FundsDeposited(FundsDeposited {
            number: AccountNumber::FIRST,
            value: 5,
        }))
        .unwrap();
        assert_eq!(
            dispatcher.dispatch(&deposit).unwrap(),
            Dispatched::Handled {
                handler: "recorder",
                outcome: Handled::Applied
            }
        );

        let unknown = EventEnvelope::from_parts(
            EventId::new(),
            "AccountClosed".to_string(),
            1,
            Utc::now(),
            "{}".to_string(),
        );
        assert_eq!(dispatcher.dispatch(&unknown).unwrap(), Dispatched::Ignored);

        assert_eq!(*recorder.seen.lock().unwrap(), vec![EventTag::FundsDeposited]);
    }

    #[test]
    fn malformed_payload_is_a_permanent_failure() {
        let dispatcher = EventDispatcher::new().with_handler(Recorder::default());
        let broken = EventEnvelope::from_parts(
            EventId::new(),
            "FundsDeposited".to_string(),
            1,
            Utc::now(),
            "{\"number\":".to_string(),
        );

        let err = dispatcher.dispatch(&broken).unwrap_err();
        assert!(matches!(err, DispatchError::Undecodable { .. }));
        assert!(!err.is_transient());
    }
}
