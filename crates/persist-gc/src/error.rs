use persist_ledger::LedgerError;
use persist_store::StoreError;

/// Failure while collecting one primitive. Logged by the worker; never
/// stops it.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}
