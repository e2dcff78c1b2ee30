use std::sync::Arc;

use persist_protocol::{PeerMessage, PROTOCOL_VERSION};
use persist_types::{Address, ErrorKind};
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};
use crate::transport::PeerTransport;

fn unexpected(expected: &'static str, got: &PeerMessage) -> RemoteError {
    RemoteError::UnexpectedResponse {
        expected,
        got: got.type_name(),
    }
}

/// Typed protocol operations over a [`PeerTransport`].
#[derive(Clone)]
pub struct PeerClient {
    transport: Arc<dyn PeerTransport>,
}

impl PeerClient {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }

    pub fn name(&self) -> &str {
        self.transport.name()
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    /// Round trip a request whose only success answer is `Ack`.
    async fn acked(&self, message: PeerMessage) -> RemoteResult<()> {
        match self.transport.request(message).await? {
            PeerMessage::Ack => Ok(()),
            PeerMessage::Nak(nak) => Err(RemoteError::Refused(nak.into_rejection())),
            other => Err(unexpected("Ack", &other)),
        }
    }

    async fn addresses(&self, message: PeerMessage) -> RemoteResult<Vec<Address>> {
        match self.transport.request(message).await? {
            PeerMessage::Addresses { addresses } => Ok(addresses),
            PeerMessage::Nak(nak) => Err(RemoteError::Refused(nak.into_rejection())),
            other => Err(unexpected("Addresses", &other)),
        }
    }

    /// Returns the peer's protocol version.
    pub async fn ping(&self) -> RemoteResult<u32> {
        match self.transport.request(PeerMessage::Ping).await? {
            PeerMessage::Pong { version } => {
                if version != PROTOCOL_VERSION {
                    debug!(peer = self.name(), version, "peer speaks another protocol version");
                }
                Ok(version)
            }
            other => Err(unexpected("Pong", &other)),
        }
    }

    /// Offer packed bytes. A NAK comes back as [`RemoteError::Refused`].
    pub async fn publish(&self, packed: Vec<u8>) -> RemoteResult<()> {
        self.acked(PeerMessage::Publish { packed }).await
    }

    /// Fetch packed bytes. `None` when the peer does not have them.
    pub async fn get(&self, address: Address) -> RemoteResult<Option<Vec<u8>>> {
        match self.transport.request(PeerMessage::Get { address }).await? {
            PeerMessage::Object { packed } => Ok(Some(packed)),
            PeerMessage::Nak(nak) => {
                let rejection = nak.into_rejection();
                if rejection.kind == ErrorKind::DoesNotExist {
                    Ok(None)
                } else {
                    Err(RemoteError::Refused(rejection))
                }
            }
            other => Err(unexpected("Object", &other)),
        }
    }

    pub async fn subscribe(&self, address: Address) -> RemoteResult<()> {
        self.acked(PeerMessage::Subscribe { address }).await
    }

    pub async fn unsubscribe(&self, address: Address) -> RemoteResult<()> {
        self.acked(PeerMessage::Unsubscribe { address }).await
    }

    pub async fn query_subscriptions(&self) -> RemoteResult<Vec<Address>> {
        self.addresses(PeerMessage::QuerySubscriptions).await
    }

    pub async fn query_bindings(&self, address: Address) -> RemoteResult<Vec<Address>> {
        self.addresses(PeerMessage::QueryBindings { address }).await
    }

    pub async fn query_debindings(&self, address: Address) -> RemoteResult<Vec<Address>> {
        self.addresses(PeerMessage::QueryDebindings { address }).await
    }

    pub async fn query_existence(&self, address: Address) -> RemoteResult<bool> {
        match self.transport.request(PeerMessage::QueryExistence { address }).await? {
            PeerMessage::Existence { exists } => Ok(exists),
            other => Err(unexpected("Existence", &other)),
        }
    }

    pub async fn disconnect(&self) -> RemoteResult<()> {
        self.acked(PeerMessage::Disconnect).await
    }
}

impl std::fmt::Debug for PeerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerClient").field("peer", &self.name()).finish()
    }
}
