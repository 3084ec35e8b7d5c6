//! Ledger account domain.
//!
//! Business rules for the authoritative account balance, implemented as
//! deterministic domain logic (no IO, no storage, no event publication).

pub mod account;

pub use account::Account;
