//! Lifetime ledger for the persister.
//!
//! The ledger is the authoritative record of what points at what. It holds
//! a summary of every live primitive plus address-keyed indices of
//! bindings, debindings, dynamic frames and pending requests. Indices hold
//! addresses only; nothing here keeps stored bytes alive.
//!
//! # Key Types
//!
//! - [`Ledger`]: the shared ledger, safe to use from the ingestion path and
//!   both background workers
//! - [`LedgerError`]: failures of the few mutations that can fail

pub mod error;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
