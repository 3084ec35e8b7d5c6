//! Event consumption: handler contract, dispatch by tag, projection handlers,
//! retry policy and dead letters.
//!
//! Delivery is at-least-once, so every handler must tolerate seeing the same
//! envelope twice. Projection writes deduplicate on the envelope id.

mod dead_letter;
mod dispatcher;
mod projection;
mod retry;

use std::sync::Arc;

use thiserror::Error;

use ledgerflow_core::DomainError;
use ledgerflow_events::{EventEnvelope, EventTag, LedgerEvent};

use crate::store::StoreError;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use dispatcher::{DispatchError, Dispatched, EventDispatcher};
pub use projection::ProjectionConsumer;
pub use retry::{BackoffStrategy, RetryPolicy};

/// What a handler did with an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Handled {
    Applied,
    /// Already processed earlier; nothing changed.
    Duplicate,
    /// Deliberately not applied (e.g. the account is not mirrored yet).
    Skipped,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// May succeed on a later attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will fail the same way every time.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl HandlerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Rejected(err.to_string())
        }
    }
}

impl From<DomainError> for HandlerError {
    fn from(err: DomainError) -> Self {
        HandlerError::Rejected(err.to_string())
    }
}

/// A reaction to consumed events.
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts(&self, tag: EventTag) -> bool;

    /// `event` is the decoded payload of `envelope`.
    fn handle(&self, envelope: &EventEnvelope, event: &LedgerEvent)
    -> Result<Handled, HandlerError>;
}

impl<H> EventHandler for Arc<H>
where
    H: EventHandler + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn accepts(&self, tag: EventTag) -> bool {
        (**self).accepts(tag)
    }

    fn handle(
        &self,
        envelope: &EventEnvelope,
        event: &LedgerEvent,
    ) -> Result<Handled, HandlerError> {
        (**self).handle(envelope, event)
    }
}
