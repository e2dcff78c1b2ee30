use async_trait::async_trait;
use persist_postal::Notification;
use persist_protocol::PeerMessage;
use tokio::sync::mpsc;

use crate::error::RemoteResult;

/// A connection to one remote persister.
///
/// Transports move messages; [`PeerClient`](crate::PeerClient) gives them
/// meaning.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Human-readable peer name for logs.
    fn name(&self) -> &str;

    /// Send one request and wait for its response.
    async fn request(&self, message: PeerMessage) -> RemoteResult<PeerMessage>;

    /// Subscription updates pushed by the peer. Yields the receiver once.
    fn take_updates(&self) -> Option<mpsc::UnboundedReceiver<Notification>>;
}
