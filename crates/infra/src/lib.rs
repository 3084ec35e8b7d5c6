//! Infrastructure layer: stores, services, event consumption, renderer client,
//! background workers and configuration.

pub mod config;
pub mod consumer;
pub mod ledger;
pub mod statement;
pub mod store;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, RendererConfig, ServiceConfig};
pub use consumer::{
    DeadLetter, DeadLetterQueue, EventDispatcher, EventHandler, Handled, HandlerError,
    ProjectionConsumer, RetryPolicy,
};
pub use ledger::{CreatedAccount, LedgerError, LedgerService, OutboxRelay, RelayError};
pub use statement::{
    DocumentRenderer, GotenbergRenderer, RenderError, StatementContent, StatementError,
    StatementService,
};
pub use store::StoreError;
pub use workers::{ConsumerWorker, RelayWorker, SweeperWorker, WorkerHandle};
