use persist_types::{Address, PrimitiveKind};

/// Errors from ledger mutations.
///
/// Lookups never fail: an unknown address simply has no bindings.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("address not in ledger: {0}")]
    NotFound(Address),

    /// Identity declarations are never collected.
    #[error("cannot collect identity {0}")]
    Uncollectable(Address),

    /// The address already names a different primitive.
    #[error("address {address} already holds a {held_by}")]
    AddressTaken {
        address: Address,
        held_by: PrimitiveKind,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
