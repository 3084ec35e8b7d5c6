use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use ledgerflow_events::{EventBus, EventEnvelope, Subscription, Topic};

use super::{WorkerHandle, wait_for_shutdown};
use crate::consumer::{DeadLetter, DeadLetterQueue, EventDispatcher, RetryPolicy};

/// Sequential consumer loop.
///
/// - Subscribes to the bus (optionally a single topic)
/// - A message counts as consumed only once its handler succeeded
/// - Transient failures are retried in place with backoff, up to the policy
/// - Exhausted, rejected and undecodable messages go to the dead-letter queue
/// - On shutdown, messages already buffered in the subscription are handled
///   before the thread exits
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    pub fn spawn<B>(
        name: &'static str,
        bus: &B,
        topic: Option<Topic>,
        dispatcher: EventDispatcher,
        retry: RetryPolicy,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope>,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = match topic {
            Some(topic) => bus.subscribe_to(topic),
            None => bus.subscribe(),
        };

        let consumer = Consumer {
            name,
            dispatcher,
            retry,
            dead_letters,
        };
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || consumer.run(sub, shutdown_rx))?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}

struct Consumer {
    name: &'static str,
    dispatcher: EventDispatcher,
    retry: RetryPolicy,
    dead_letters: Arc<DeadLetterQueue>,
}

enum Flow {
    Continue,
    Stop,
}

impl Consumer {
    fn run(&self, sub: Subscription<EventEnvelope>, shutdown_rx: mpsc::Receiver<()>) {
        let tick = Duration::from_millis(250);
        info!(worker = self.name, "consumer started");

        loop {
            if shutdown_rx.try_recv().is_ok() {
                self.drain(&sub, &shutdown_rx);
                break;
            }

            match sub.recv_timeout(tick) {
                Ok(envelope) => {
                    if let Flow::Stop = self.process(envelope, &shutdown_rx) {
                        self.drain(&sub, &shutdown_rx);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(worker = self.name, "consumer stopped");
    }

    /// Handle whatever is already buffered. Those messages were published, so
    /// nothing upstream will redeliver them.
    fn drain(&self, sub: &Subscription<EventEnvelope>, shutdown_rx: &mpsc::Receiver<()>) {
        let mut drained = 0usize;
        while let Ok(envelope) = sub.try_recv() {
            self.process(envelope, shutdown_rx);
            drained += 1;
        }
        if drained > 0 {
            info!(worker = self.name, drained, "drained buffered events before stopping");
        }
    }

    fn process(&self, envelope: EventEnvelope, shutdown_rx: &mpsc::Receiver<()>) -> Flow {
        let mut attempt = 1;

        loop {
            let err = match self.dispatcher.dispatch(&envelope) {
                Ok(_) => return Flow::Continue,
                Err(err) => err,
            };

            if !err.is_transient() || !self.retry.should_retry(attempt) {
                error!(
                    worker = self.name,
                    event_id = %envelope.id(),
                    event_type = envelope.event_type(),
                    attempt,
                    error = %err,
                    "dead-lettering event"
                );
                self.dead_letter(envelope, err.to_string(), attempt);
                return Flow::Continue;
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                worker = self.name,
                event_id = %envelope.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "event handling failed, retrying"
            );

            if wait_for_shutdown(shutdown_rx, delay) {
                // Keep it for requeueing rather than dropping it.
                self.dead_letter(envelope, format!("shutdown before retry: {err}"), attempt);
                return Flow::Stop;
            }
            attempt += 1;
        }
    }

    fn dead_letter(&self, envelope: EventEnvelope, reason: String, attempts: u32) {
        if let Err(err) = self
            .dead_letters
            .push(DeadLetter::new(envelope, reason, attempts))
        {
            error!(worker = self.name, error = %err, "dead-letter queue unavailable, event dropped");
        }
    }
}
