use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use persist_postal::Notification;
use persist_protocol::{Envelope, PeerCodec, PeerMessage};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::handler::PeerHandler;
use crate::transport::PeerTransport;

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Requests waiting for their response.
#[derive(Default)]
struct Waiters {
    by_id: HashMap<u64, oneshot::Sender<PeerMessage>>,
    /// Set once the reader stops; no response can arrive after that.
    closed: bool,
}

type Pending = Arc<Mutex<Waiters>>;

/// In-process transport to a [`PeerHandler`].
///
/// Both directions run through the framing codec over an in-memory duplex
/// stream, so the whole wire path is exercised without sockets.
pub struct LoopbackTransport {
    name: String,
    writer: tokio::sync::Mutex<WriteHalf<DuplexStream>>,
    pending: Pending,
    next_id: AtomicU64,
    updates: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LoopbackTransport {
    /// Connect to `handler`. Must be called within a tokio runtime.
    pub fn connect(name: impl Into<String>, handler: PeerHandler) -> Self {
        let name = name.into();
        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);

        let server_name = name.clone();
        let server_task = tokio::spawn(async move {
            if let Err(e) = handler.serve(server).await {
                warn!(peer = %server_name, error = %e, "loopback server failed");
            }
        });

        let (reader, writer) = tokio::io::split(client);
        let pending: Pending = Arc::new(Mutex::new(Waiters::default()));
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(run_reader(reader, pending.clone(), updates_tx));

        Self {
            name,
            writer: tokio::sync::Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            updates: Mutex::new(Some(updates_rx)),
            tasks: vec![server_task, reader_task],
        }
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .remove(&id);
    }
}

/// Route responses to their waiting requests and pushes to the update
/// channel. Pending requests fail once the stream ends.
async fn run_reader(
    mut reader: ReadHalf<DuplexStream>,
    pending: Pending,
    updates: mpsc::UnboundedSender<Notification>,
) {
    loop {
        let envelope = match PeerCodec::read_frame(&mut reader).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "loopback read failed");
                break;
            }
        };
        match envelope.message {
            PeerMessage::SubscriptionUpdate {
                subscription,
                notification,
            } => {
                if updates
                    .send(Notification::new(subscription, notification))
                    .is_err()
                {
                    debug!(subscription = %subscription, "update dropped, nobody listening");
                }
            }
            message => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .by_id
                    .remove(&envelope.id);
                match waiter {
                    Some(waiter) => {
                        // The requester may have given up.
                        let _ = waiter.send(message);
                    }
                    None => debug!(id = envelope.id, "response without a request"),
                }
            }
        }
    }
    let mut waiters = pending.lock().unwrap_or_else(PoisonError::into_inner);
    waiters.closed = true;
    waiters.by_id.clear();
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, message: PeerMessage) -> RemoteResult<PeerMessage> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if waiters.closed {
                return Err(RemoteError::Disconnected);
            }
            waiters.by_id.insert(id, tx);
        }

        let written = {
            let mut writer = self.writer.lock().await;
            PeerCodec::write_frame(&mut *writer, &Envelope::new(id, message)).await
        };
        if let Err(e) = written {
            self.forget(id);
            return Err(e.into());
        }
        rx.await.map_err(|_| RemoteError::Disconnected)
    }

    fn take_updates(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
