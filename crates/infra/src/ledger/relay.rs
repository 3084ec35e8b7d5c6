use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use ledgerflow_events::{EventBus, EventEnvelope};

use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("outbox store error: {0}")]
    Store(#[from] StoreError),

    #[error("publish failed: {0}")]
    Publish(String),
}

/// Publishes committed outbox rows to the bus, in commit order.
///
/// A row is marked published only after the bus accepted it, so a crash in
/// between republishes it (at-least-once).
#[derive(Debug)]
pub struct OutboxRelay<S, B> {
    store: S,
    bus: B,
    batch_size: usize,
}

impl<S, B> OutboxRelay<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope>,
{
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Publish one batch of pending rows; returns how many were published.
    ///
    /// Stops at the first publish failure so later rows never overtake it.
    pub fn relay_once(&self) -> Result<usize, RelayError> {
        let pending = self.store.pending_outbox(self.batch_size)?;
        let mut published = 0;

        for entry in pending {
            if let Err(err) = self.bus.publish(entry.envelope.clone()) {
                warn!(
                    sequence = entry.sequence,
                    event_id = %entry.envelope.id(),
                    published,
                    error = %err,
                    "outbox publish failed"
                );
                return Err(RelayError::Publish(err.to_string()));
            }
            self.store.mark_published(entry.sequence, Utc::now())?;
            published += 1;
        }

        if published > 0 {
            debug!(published, "outbox batch relayed");
        }
        Ok(published)
    }

    /// Relay until the outbox is empty.
    pub fn drain(&self) -> Result<usize, RelayError> {
        let mut total = 0;
        loop {
            let published = self.relay_once()?;
            if published == 0 {
                return Ok(total);
            }
            total += published;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use ledgerflow_core::IdempotencyKey;
    use ledgerflow_events::{InMemoryEventBus, Subscription, Topic};

    use crate::ledger::LedgerService;
    use crate::store::InMemoryLedgerStore;

    #[derive(Default)]
    struct FlakyBus {
        inner: InMemoryEventBus<EventEnvelope>,
        down: AtomicBool,
    }

    impl EventBus<EventEnvelope> for FlakyBus {
        type Error = String;

        fn publish(&self, message: EventEnvelope) -> Result<(), Self::Error> {
            if self.down.load(Ordering::SeqCst) {
                return Err("broker unavailable".to_string());
            }
            self.inner.publish(message).map_err(|e| e.to_string())
        }

        fn subscribe(&self) -> Subscription<EventEnvelope> {
            self.inner.subscribe()
        }

        fn subscribe_to(&self, topic: Topic) -> Subscription<EventEnvelope> {
            self.inner.subscribe_to(topic)
        }
    }

    #[test]
    fn key_is_confirmed_once_its_events_are_published() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let bus = Arc::new(FlakyBus::default());
        let service = LedgerService::new(store.clone());
        let relay = OutboxRelay::new(store.clone(), bus.clone());
        let sub = bus.subscribe();

        let account = service.create_account("01234567890", "John Doe").unwrap();
        let key = IdempotencyKey::parse("dep-1").unwrap();
        service.deposit(account.number, 150, &key).unwrap();

        assert!(!store.idempotency_key(&key).unwrap().unwrap().is_confirmed());

        bus.down.store(true, Ordering::SeqCst);
        assert!(matches!(relay.relay_once(), Err(RelayError::Publish(_))));
        assert_eq!(store.pending_outbox(10).unwrap().len(), 2);

        bus.down.store(false, Ordering::SeqCst);
        assert_eq!(relay.drain().unwrap(), 2);
        assert!(store.pending_outbox(10).unwrap().is_empty());
        assert!(store.idempotency_key(&key).unwrap().unwrap().is_confirmed());

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert_eq!(first.event_type(), "AccountCreated");
        assert_eq!(second.event_type(), "FundsDeposited");
    }
}
