//! In-memory event bus for tests/dev and single-process deployments.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};
use crate::event::Topic;
use crate::routing::Routable;

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

struct Subscriber<M> {
    topic: Option<Topic>,
    sender: mpsc::Sender<M>,
}

impl<M: Routable> Subscriber<M> {
    fn wants(&self, message: &M) -> bool {
        match self.topic {
            None => true,
            Some(topic) => message.topic() == Some(topic),
        }
    }
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out, in publish order per subscriber
/// - At-least-once acceptable (subscribers must be idempotent)
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, topic: Option<Topic>) -> Subscription<M> {
        let (sender, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { topic, sender });
        }

        Subscription::new(rx)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let count = self.subscribers.lock().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &count)
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Routable + Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|sub| !sub.wants(&message) || sub.sender.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.register(None)
    }

    fn subscribe_to(&self, topic: Topic) -> Subscription<M> {
        self.register(Some(topic))
    }
}
