use persist_types::{Address, ErrorKind, Rejection};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Negative acknowledgement. The code travels as two big-endian bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nak {
    pub code: [u8; 2],
    pub reason: String,
}

impl Nak {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            code: kind.to_be_bytes(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> u16 {
        u16::from_be_bytes(self.code)
    }

    pub fn kind(&self) -> ProtocolResult<ErrorKind> {
        ErrorKind::from_be_bytes(self.code).map_err(|_| ProtocolError::UnknownNakCode(self.code()))
    }

    /// Back to a local rejection. Unknown codes become generic.
    pub fn into_rejection(self) -> Rejection {
        let kind = self.kind().unwrap_or(ErrorKind::Generic);
        Rejection::new(kind, self.reason)
    }
}

impl From<Rejection> for Nak {
    fn from(rejection: Rejection) -> Self {
        Self::new(rejection.kind, rejection.reason)
    }
}

/// Every message exchanged between persisters.
///
/// Requests flow client to server and are answered by exactly one response
/// with the same envelope id. `SubscriptionUpdate` is pushed by the server
/// unprompted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    // Requests
    Ping,
    Publish { packed: Vec<u8> },
    Get { address: Address },
    Subscribe { address: Address },
    Unsubscribe { address: Address },
    QuerySubscriptions,
    QueryBindings { address: Address },
    QueryDebindings { address: Address },
    QueryExistence { address: Address },
    Disconnect,

    // Responses
    Pong { version: u32 },
    Ack,
    Nak(Nak),
    Object { packed: Vec<u8> },
    Addresses { addresses: Vec<Address> },
    Existence { exists: bool },

    // Server push
    SubscriptionUpdate {
        subscription: Address,
        notification: Address,
    },
}

impl PeerMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Ping => 1,
            Self::Publish { .. } => 2,
            Self::Get { .. } => 3,
            Self::Subscribe { .. } => 4,
            Self::Unsubscribe { .. } => 5,
            Self::QuerySubscriptions => 6,
            Self::QueryBindings { .. } => 7,
            Self::QueryDebindings { .. } => 8,
            Self::QueryExistence { .. } => 9,
            Self::Disconnect => 10,
            Self::Pong { .. } => 64,
            Self::Ack => 65,
            Self::Nak(_) => 66,
            Self::Object { .. } => 67,
            Self::Addresses { .. } => 68,
            Self::Existence { .. } => 69,
            Self::SubscriptionUpdate { .. } => 128,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Publish { .. } => "Publish",
            Self::Get { .. } => "Get",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::QuerySubscriptions => "QuerySubscriptions",
            Self::QueryBindings { .. } => "QueryBindings",
            Self::QueryDebindings { .. } => "QueryDebindings",
            Self::QueryExistence { .. } => "QueryExistence",
            Self::Disconnect => "Disconnect",
            Self::Pong { .. } => "Pong",
            Self::Ack => "Ack",
            Self::Nak(_) => "Nak",
            Self::Object { .. } => "Object",
            Self::Addresses { .. } => "Addresses",
            Self::Existence { .. } => "Existence",
            Self::SubscriptionUpdate { .. } => "SubscriptionUpdate",
        }
    }

    pub fn is_request(&self) -> bool {
        self.type_tag() < 64
    }

    pub fn is_push(&self) -> bool {
        matches!(self, Self::SubscriptionUpdate { .. })
    }
}

/// A message tagged with the id that pairs a request with its response.
/// Pushes carry id 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub message: PeerMessage,
}

impl Envelope {
    pub fn new(id: u64, message: PeerMessage) -> Self {
        Self { id, message }
    }

    pub fn push(message: PeerMessage) -> Self {
        Self { id: 0, message }
    }
}
