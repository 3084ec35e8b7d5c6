//! Background worker threads: event consumption, outbox relay and the
//! statement deadline sweep.

mod consumer_worker;
mod relay_worker;
mod sweeper_worker;

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

pub use consumer_worker::ConsumerWorker;
pub use relay_worker::RelayWorker;
pub use sweeper_worker::SweeperWorker;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    fn new(shutdown: mpsc::Sender<()>, join: thread::JoinHandle<()>) -> Self {
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Sleep up to `timeout`; true if shutdown was requested meanwhile.
fn wait_for_shutdown(shutdown_rx: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    match shutdown_rx.recv_timeout(timeout) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        // Handle dropped without a shutdown request; keep the pace.
        Err(RecvTimeoutError::Disconnected) => {
            thread::sleep(timeout);
            false
        }
    }
}
