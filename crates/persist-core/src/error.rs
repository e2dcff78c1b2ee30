use persist_types::{Address, Rejection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("does not exist: {0}")]
    DoesNotExist(Address),

    #[error("integrity failure for {address}: {reason}")]
    Integrity { address: Address, reason: String },

    #[error("{0} is not flagged for repair")]
    NotSuspect(Address),

    #[error("primitive rejected: {0}")]
    Rejected(Rejection),

    #[error("ledger error: {0}")]
    Ledger(#[from] persist_ledger::LedgerError),

    #[error("store error: {0}")]
    Store(#[from] persist_store::StoreError),

    #[error("verification error: {0}")]
    Verify(#[from] persist_verify::VerifyError),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PersistError {
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::DoesNotExist(_))
    }
}

pub type PersistResult<T> = Result<T, PersistError>;
