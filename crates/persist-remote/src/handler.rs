use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use persist_core::{IngestResult, Persister};
use persist_postal::{DeliveryError, SubscriptionId};
use persist_protocol::{Envelope, Nak, PeerCodec, PeerMessage, PROTOCOL_VERSION};
use persist_types::{Address, ErrorKind};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RemoteResult;

/// Serves the peer protocol against a local [`Persister`].
#[derive(Clone)]
pub struct PeerHandler {
    persister: Arc<Persister>,
}

impl PeerHandler {
    pub fn new(persister: Arc<Persister>) -> Self {
        Self { persister }
    }

    pub fn persister(&self) -> &Arc<Persister> {
        &self.persister
    }

    /// A session whose pushes go to `outbox`.
    pub fn session(&self, outbox: mpsc::UnboundedSender<Envelope>) -> PeerSession {
        PeerSession {
            persister: self.persister.clone(),
            outbox,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Serve one connection until the peer disconnects or the stream ends.
    pub async fn serve<S>(&self, stream: S) -> RemoteResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outbox, mut outgoing) = mpsc::unbounded_channel::<Envelope>();
        let writer_task = tokio::spawn(async move {
            while let Some(envelope) = outgoing.recv().await {
                if let Err(e) = PeerCodec::write_frame(&mut writer, &envelope).await {
                    warn!(error = %e, "failed to write to peer");
                    break;
                }
            }
        });

        let session = self.session(outbox.clone());
        info!("peer session opened");
        let result = loop {
            let envelope = match PeerCodec::read_frame(&mut reader).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            };
            let disconnect = matches!(envelope.message, PeerMessage::Disconnect);
            let response = session.handle(envelope.message).await;
            if outbox.send(Envelope::new(envelope.id, response)).is_err() || disconnect {
                break Ok(());
            }
        };

        drop(session);
        drop(outbox);
        if let Err(e) = writer_task.await {
            warn!(error = %e, "peer writer ended abnormally");
        }
        info!("peer session closed");
        result
    }
}

impl std::fmt::Debug for PeerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandler").finish_non_exhaustive()
    }
}

/// One connected peer: its subscriptions and its outbox.
///
/// Dropping the session cancels every subscription it made.
pub struct PeerSession {
    persister: Arc<Persister>,
    outbox: mpsc::UnboundedSender<Envelope>,
    subscriptions: Mutex<HashMap<Address, SubscriptionId>>,
}

impl PeerSession {
    /// Answer one request.
    pub async fn handle(&self, message: PeerMessage) -> PeerMessage {
        debug!(message = message.type_name(), "peer request");
        match message {
            PeerMessage::Ping => PeerMessage::Pong {
                version: PROTOCOL_VERSION,
            },
            PeerMessage::Publish { packed } => match self.persister.ingest(&packed, false).await {
                Ok(IngestResult::Rejected(rejection)) => PeerMessage::Nak(rejection.into()),
                Ok(_) => PeerMessage::Ack,
                Err(e) => {
                    warn!(error = %e, "publish failed");
                    PeerMessage::Nak(Nak::new(ErrorKind::Generic, e.to_string()))
                }
            },
            PeerMessage::Get { address } => match self.persister.retrieve(&address) {
                Ok(packed) => PeerMessage::Object { packed },
                Err(e) if e.is_does_not_exist() => {
                    PeerMessage::Nak(Nak::new(ErrorKind::DoesNotExist, e.to_string()))
                }
                Err(e) => PeerMessage::Nak(Nak::new(ErrorKind::Generic, e.to_string())),
            },
            PeerMessage::Subscribe { address } => {
                self.subscribe(address);
                PeerMessage::Ack
            }
            PeerMessage::Unsubscribe { address } => {
                self.unsubscribe(&address);
                PeerMessage::Ack
            }
            PeerMessage::QuerySubscriptions => PeerMessage::Addresses {
                addresses: self.subscriptions(),
            },
            PeerMessage::QueryBindings { address } => PeerMessage::Addresses {
                addresses: self.persister.bindings_of(&address),
            },
            PeerMessage::QueryDebindings { address } => PeerMessage::Addresses {
                addresses: self.persister.debindings_of(&address),
            },
            PeerMessage::QueryExistence { address } => PeerMessage::Existence {
                exists: self.persister.contains(&address),
            },
            PeerMessage::Disconnect => {
                self.clear();
                PeerMessage::Ack
            }
            other => PeerMessage::Nak(Nak::new(
                ErrorKind::Generic,
                format!("{} is not a request", other.type_name()),
            )),
        }
    }

    fn subscribe(&self, address: Address) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        if subscriptions.contains_key(&address) {
            return;
        }
        let outbox = self.outbox.clone();
        let forward = move |subscription: Address, notification: Address| {
            outbox
                .send(Envelope::push(PeerMessage::SubscriptionUpdate {
                    subscription,
                    notification,
                }))
                .map_err(|_| DeliveryError::Closed)
        };
        let id = self.persister.subscribe(address, Arc::new(forward));
        subscriptions.insert(address, id);
    }

    fn unsubscribe(&self, address: &Address) -> bool {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
        match removed {
            Some(id) => self.persister.unsubscribe(address, id),
            None => false,
        }
    }

    pub fn subscriptions(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        out.sort();
        out
    }

    fn clear(&self) {
        let drained: Vec<(Address, SubscriptionId)> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (address, id) in drained {
            self.persister.unsubscribe(&address, id);
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persist_crypto::{Author, WirePrimitive};

    async fn session() -> (PeerSession, mpsc::UnboundedReceiver<Envelope>, Author) {
        let persister = Arc::new(Persister::in_memory());
        let alice = Author::generate();
        persister
            .ingest(&alice.declaration().pack().unwrap(), true)
            .await
            .unwrap();
        let (outbox, rx) = mpsc::unbounded_channel();
        (PeerHandler::new(persister).session(outbox), rx, alice)
    }

    fn nak_kind(message: &PeerMessage) -> ErrorKind {
        match message {
            PeerMessage::Nak(nak) => nak.kind().unwrap(),
            other => panic!("expected nak, got {}", other.type_name()),
        }
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ping_answers_with_version() {
        let (session, _rx, _) = session().await;
        assert_eq!(
            session.handle(PeerMessage::Ping).await,
            PeerMessage::Pong {
                version: PROTOCOL_VERSION
            }
        );
    }

    #[tokio::test]
    async fn publish_acks_and_naks_with_rejection_code() {
        let (session, _rx, alice) = session().await;
        let binding = alice.bind_static(Address::from_bytes(b"c"));
        let packed = binding.pack().unwrap();

        assert_eq!(
            session.handle(PeerMessage::Publish { packed: packed.clone() }).await,
            PeerMessage::Ack
        );
        // Idempotent.
        assert_eq!(
            session.handle(PeerMessage::Publish { packed }).await,
            PeerMessage::Ack
        );

        let orphan = alice.container(b"orphan".to_vec()).pack().unwrap();
        let response = session.handle(PeerMessage::Publish { packed: orphan }).await;
        assert_eq!(nak_kind(&response), ErrorKind::UnboundContainer);

        let garbage = session
            .handle(PeerMessage::Publish { packed: vec![0; 3] })
            .await;
        assert_eq!(nak_kind(&garbage), ErrorKind::MalformedPrimitive);
    }

    #[tokio::test]
    async fn get_missing_is_does_not_exist() {
        let (session, _rx, alice) = session().await;
        let response = session
            .handle(PeerMessage::Get {
                address: Address::from_bytes(b"missing"),
            })
            .await;
        assert_eq!(nak_kind(&response), ErrorKind::DoesNotExist);

        let response = session
            .handle(PeerMessage::Get {
                address: alice.address(),
            })
            .await;
        assert_eq!(
            response,
            PeerMessage::Object {
                packed: alice.declaration().pack().unwrap()
            }
        );
    }

    #[tokio::test]
    async fn queries_reflect_the_ledger() {
        let (session, _rx, alice) = session().await;
        let target = Address::from_bytes(b"c");
        let binding = alice.bind_static(target);
        session
            .handle(PeerMessage::Publish {
                packed: binding.pack().unwrap(),
            })
            .await;

        assert_eq!(
            session.handle(PeerMessage::QueryBindings { address: target }).await,
            PeerMessage::Addresses {
                addresses: vec![binding.address()]
            }
        );
        assert_eq!(
            session
                .handle(PeerMessage::QueryExistence {
                    address: binding.address()
                })
                .await,
            PeerMessage::Existence { exists: true }
        );

        let debinding = alice.debind(binding.address());
        session
            .handle(PeerMessage::Publish {
                packed: debinding.pack().unwrap(),
            })
            .await;
        assert_eq!(
            session
                .handle(PeerMessage::QueryDebindings {
                    address: binding.address()
                })
                .await,
            PeerMessage::Addresses {
                addresses: vec![debinding.address()]
            }
        );
    }

    #[tokio::test]
    async fn responses_are_not_requests() {
        let (session, _rx, _) = session().await;
        let response = session.handle(PeerMessage::Ack).await;
        assert_eq!(nak_kind(&response), ErrorKind::Generic);
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn subscription_updates_reach_the_outbox() {
        let (session, mut rx, alice) = session().await;
        session
            .handle(PeerMessage::Subscribe {
                address: alice.address(),
            })
            .await;
        assert_eq!(
            session.handle(PeerMessage::QuerySubscriptions).await,
            PeerMessage::Addresses {
                addresses: vec![alice.address()]
            }
        );

        let request = persist_crypto::Request::new(alice.address(), b"hi".to_vec());
        session
            .handle(PeerMessage::Publish {
                packed: request.pack().unwrap(),
            })
            .await;
        session.persister.await_idle().await;

        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.id, 0);
        assert_eq!(
            pushed.message,
            PeerMessage::SubscriptionUpdate {
                subscription: alice.address(),
                notification: request.address(),
            }
        );
    }

    #[tokio::test]
    async fn disconnect_drops_subscriptions() {
        let (session, _rx, alice) = session().await;
        session
            .handle(PeerMessage::Subscribe {
                address: alice.address(),
            })
            .await;
        assert_eq!(session.handle(PeerMessage::Disconnect).await, PeerMessage::Ack);
        assert!(session.subscriptions().is_empty());
        assert!(session.persister.list_subscriptions().is_empty());
    }
}
