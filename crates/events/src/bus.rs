//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes already-committed events to consumers. Delivery is
//! **at-least-once**: a message may arrive more than once, so consumers must be
//! idempotent (they deduplicate on the envelope id).
//!
//! The bus is not storage. The ledger writes events to its outbox in the same
//! transaction as the balance change; the relay then publishes them, and a
//! failed publish is retried from the outbox.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::event::Topic;

/// A subscription to an event stream.
///
/// Each subscription gets its own copy of every message it matches
/// (broadcast semantics). Meant to be drained by a single thread.
///
/// ```ignore
/// let subscription = bus.subscribe_to(Topic::Account);
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(message) => process(message)?,
///         Err(RecvTimeoutError::Timeout) => continue, // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic pub/sub.
///
/// `publish()` can fail; callers decide whether to retry. Implementations
/// must be safe to share across threads.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Receive every message, whatever its topic (including unknown types).
    fn subscribe(&self) -> Subscription<M>;

    /// Receive only messages routed to `topic`.
    fn subscribe_to(&self, topic: Topic) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn subscribe_to(&self, topic: Topic) -> Subscription<M> {
        (**self).subscribe_to(topic)
    }
}
