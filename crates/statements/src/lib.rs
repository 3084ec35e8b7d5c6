//! Statement-side domain (projection read model).
//!
//! Mirrored accounts and their movement history are derived from ledger
//! events; statement generation jobs move through a small state machine and
//! end in exactly one terminal state.

pub mod account;
pub mod generation;
pub mod movement;
pub mod report;

pub use account::MirroredAccount;
pub use generation::{GenerationStatus, StatementGeneration};
pub use movement::{Direction, Movement};
pub use report::{StatementReport, StatementRow, format_amount};
