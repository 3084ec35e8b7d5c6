use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use ledgerflow_events::{EventBus, EventEnvelope};

use super::{WorkerHandle, wait_for_shutdown};
use crate::statement::StatementService;
use crate::store::ProjectionStore;

/// Periodically fails statement jobs stuck in `running` past the deadline.
#[derive(Debug)]
pub struct SweeperWorker;

impl SweeperWorker {
    pub fn spawn<S, B>(
        name: &'static str,
        service: Arc<StatementService<S, B>>,
        interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        S: ProjectionStore + 'static,
        B: EventBus<EventEnvelope> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match service.expire_stale(Utc::now()) {
                        Ok(0) => {}
                        Ok(expired) => info!(worker = name, expired, "expired stale statement jobs"),
                        Err(err) => warn!(worker = name, error = %err, "statement sweep failed"),
                    }
                    if wait_for_shutdown(&shutdown_rx, interval) {
                        break;
                    }
                }
            })?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}
