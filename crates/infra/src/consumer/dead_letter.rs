use std::sync::Mutex;

use chrono::{DateTime, Utc};

use ledgerflow_core::EventId;
use ledgerflow_events::EventEnvelope;

use crate::store::{StoreError, poisoned};

/// A message the consumer gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub envelope: EventEnvelope,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(envelope: EventEnvelope, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            envelope,
            reason: reason.into(),
            attempts,
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Parking lot for poison and exhausted messages.
///
/// Entries stay until an operator takes them back out, typically to
/// republish after fixing the cause.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, letter: DeadLetter) -> Result<(), StoreError> {
        self.entries.lock().map_err(poisoned)?.push(letter);
        Ok(())
    }

    /// Dead letters, oldest first.
    pub fn list(&self) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self.entries.lock().map_err(poisoned)?.clone())
    }

    /// Remove and return the entry for `event_id`, for requeueing.
    pub fn take(&self, event_id: EventId) -> Result<Option<DeadLetter>, StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries
            .iter()
            .position(|l| l.envelope.id() == event_id)
            .map(|idx| entries.remove(idx)))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.lock().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::AccountNumber;
    use ledgerflow_events::{FundsDeposited, LedgerEvent};

    fn envelope() -> EventEnvelope {
        EventEnvelope::seal(&LedgerEvent::FundsDeposited(FundsDeposited {
            number: AccountNumber::FIRST,
            value: 10,
        }))
        .unwrap()
    }

    #[test]
    fn take_removes_only_the_requested_letter() {
        let queue = DeadLetterQueue::new();
        let first = envelope();
        let second = envelope();
        queue.push(DeadLetter::new(first.clone(), "boom", 3)).unwrap();
        queue.push(DeadLetter::new(second.clone(), "bang", 1)).unwrap();

        let taken = queue.take(second.id()).unwrap().unwrap();
        assert_eq!(taken.reason, "bang");
        assert_eq!(taken.attempts, 1);

        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.list().unwrap()[0].envelope, first);
        assert!(queue.take(second.id()).unwrap().is_none());
    }
}
