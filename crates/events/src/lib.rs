//! Ledger events: closed event catalogue, wire envelope and pub/sub mechanics.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod routing;

pub use bus::{EventBus, Subscription};
pub use envelope::{EnvelopeError, EventEnvelope};
pub use event::{
    AccountCreated, Event, EventTag, FundsDeposited, LedgerEvent, StatementGenerationRequested,
    Topic, TransferRealized, TransferReceived,
};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use routing::Routable;
