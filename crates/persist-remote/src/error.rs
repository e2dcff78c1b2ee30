use persist_types::{Address, Rejection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("peer refused: {0}")]
    Refused(Rejection),

    #[error("no upstream could supply {0}")]
    UnavailableUpstream(Address),

    #[error("protocol error: {0}")]
    Protocol(#[from] persist_protocol::ProtocolError),

    #[error("persister error: {0}")]
    Persist(#[from] persist_core::PersistError),
}

pub type RemoteResult<T> = Result<T, RemoteError>;
