use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use ledgerflow_events::{EventBus, EventEnvelope};

use super::{WorkerHandle, wait_for_shutdown};
use crate::ledger::OutboxRelay;
use crate::store::LedgerStore;

/// Polls the outbox and publishes pending events every `interval`.
#[derive(Debug)]
pub struct RelayWorker;

impl RelayWorker {
    pub fn spawn<S, B>(
        name: &'static str,
        relay: OutboxRelay<S, B>,
        interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        S: LedgerStore + 'static,
        B: EventBus<EventEnvelope> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!(worker = name, "outbox relay started");
                loop {
                    if let Err(err) = relay.drain() {
                        warn!(worker = name, error = %err, "outbox relay pass failed");
                    }
                    if wait_for_shutdown(&shutdown_rx, interval) {
                        break;
                    }
                }
                // Flush what was committed before the stop request.
                if let Err(err) = relay.drain() {
                    warn!(worker = name, error = %err, "final outbox flush failed");
                }
                info!(worker = name, "outbox relay stopped");
            })?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}
