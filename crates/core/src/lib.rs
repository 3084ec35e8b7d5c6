//! `ledgerflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger and the
//! statement side (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, AccountNumber, EventId, MovementId, StatementGenerationId};
pub use value_object::{AccountName, Document, IdempotencyKey, ValueObject};
pub use version::ExpectedVersion;
