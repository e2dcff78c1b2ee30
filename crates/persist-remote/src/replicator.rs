use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use persist_core::{IngestResult, Persister};
use persist_postal::Notification;
use persist_types::{Address, Summary};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::PeerClient;
use crate::error::{RemoteError, RemoteResult};
use crate::transport::PeerTransport;

/// State shared with the replication workers.
struct Shared {
    persister: Arc<Persister>,
    upstreams: RwLock<Vec<PeerClient>>,
    /// Addresses we asked every upstream to keep us informed about.
    registered: Mutex<BTreeSet<Address>>,
}

impl Shared {
    fn upstreams(&self) -> Vec<PeerClient> {
        self.upstreams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch `address` from whichever upstream answers first.
    async fn fetch(&self, address: Address) -> RemoteResult<Vec<u8>> {
        let mut attempts = JoinSet::new();
        for client in self.upstreams() {
            attempts.spawn(async move {
                let result = client.get(address).await;
                (client, result)
            });
        }

        while let Some(joined) = attempts.join_next().await {
            let (client, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "pull attempt ended abnormally");
                    continue;
                }
            };
            match result {
                Ok(Some(packed)) => {
                    debug!(address = %address, peer = client.name(), "pulled");
                    attempts.abort_all();
                    return Ok(packed);
                }
                Ok(None) => debug!(address = %address, peer = client.name(), "peer does not have it"),
                Err(e) => warn!(address = %address, peer = client.name(), error = %e, "pull failed"),
            }
        }
        Err(RemoteError::UnavailableUpstream(address))
    }

    async fn pull(&self, address: Address) -> RemoteResult<IngestResult> {
        let packed = self.fetch(address).await?;
        let result = self.persister.ingest(&packed, false).await?;

        // A frame is only useful with its target.
        if let IngestResult::NewlyStored(Summary::DynamicBinding { target, .. }) = &result {
            if !self.persister.contains(target) {
                match self.fetch(*target).await {
                    Ok(packed) => {
                        self.persister.ingest(&packed, false).await?;
                    }
                    Err(e) => debug!(target = %target, error = %e, "frame target unavailable"),
                }
            }
        }
        Ok(result)
    }

    async fn publish_everywhere(&self, packed: Vec<u8>) {
        for client in self.upstreams() {
            match client.publish(packed.clone()).await {
                Ok(()) => {}
                Err(RemoteError::Refused(rejection)) => {
                    debug!(peer = client.name(), reason = %rejection, "upstream refused push")
                }
                Err(e) => warn!(peer = client.name(), error = %e, "push failed"),
            }
        }
    }
}

/// Keeps a persister in step with its upstream peers.
///
/// Local primitives are pushed to every upstream. Pulls ask all upstreams
/// at once and keep the first answer. Subscription updates from upstream
/// trigger a pull of the notified address.
pub struct Replicator {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Replicator {
    /// Start the push worker. Must be called within a tokio runtime.
    pub fn spawn(persister: Arc<Persister>) -> Self {
        let outbound = persister.attach_outbound();
        let shared = Arc::new(Shared {
            persister,
            upstreams: RwLock::new(Vec::new()),
            registered: Mutex::new(BTreeSet::new()),
        });
        let cancel = CancellationToken::new();
        let push = tokio::spawn(run_push_loop(shared.clone(), outbound, cancel.clone()));
        Self {
            shared,
            cancel,
            workers: Mutex::new(vec![push]),
        }
    }

    /// Add an upstream and subscribe it to every registered address.
    pub async fn add_upstream(&self, transport: Arc<dyn PeerTransport>) -> RemoteResult<()> {
        let client = PeerClient::new(transport);
        client.ping().await?;

        if let Some(updates) = client.transport().take_updates() {
            let worker = tokio::spawn(run_update_loop(
                self.shared.clone(),
                client.name().to_string(),
                updates,
                self.cancel.clone(),
            ));
            self.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(worker);
        }

        let registered: Vec<Address> = self
            .shared
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        for address in registered {
            client.subscribe(address).await?;
        }

        info!(peer = client.name(), "upstream added");
        self.shared
            .upstreams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
        Ok(())
    }

    /// Remove an upstream by name. Returns whether it was present.
    pub async fn remove_upstream(&self, name: &str) -> bool {
        let removed = {
            let mut upstreams = self.shared.upstreams.write().unwrap_or_else(PoisonError::into_inner);
            let position = upstreams.iter().position(|client| client.name() == name);
            position.map(|index| upstreams.remove(index))
        };
        match removed {
            Some(client) => {
                if let Err(e) = client.disconnect().await {
                    debug!(peer = name, error = %e, "disconnect failed");
                }
                info!(peer = name, "upstream removed");
                true
            }
            None => false,
        }
    }

    pub fn upstream_names(&self) -> Vec<String> {
        self.shared
            .upstreams()
            .iter()
            .map(|client| client.name().to_string())
            .collect()
    }

    /// Fetch `address` from the first upstream that has it and ingest it.
    /// A pulled dynamic frame also pulls its target if missing.
    pub async fn pull(&self, address: Address) -> RemoteResult<IngestResult> {
        self.shared.pull(address).await
    }

    /// Ask every upstream for updates on `address`. Returns how many
    /// accepted.
    pub async fn register(&self, address: Address) -> usize {
        self.shared
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address);
        let mut accepted = 0;
        for client in self.shared.upstreams() {
            match client.subscribe(address).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!(peer = client.name(), address = %address, error = %e, "upstream subscribe failed"),
            }
        }
        accepted
    }

    pub async fn deregister(&self, address: Address) {
        self.shared
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&address);
        for client in self.shared.upstreams() {
            if let Err(e) = client.unsubscribe(address).await {
                debug!(peer = client.name(), address = %address, error = %e, "upstream unsubscribe failed");
            }
        }
    }

    pub fn registered(&self) -> Vec<Address> {
        self.shared
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Replace a locally corrupted object with an upstream copy.
    pub async fn refetch(&self, address: Address) -> RemoteResult<Address> {
        let packed = self.shared.fetch(address).await?;
        Ok(self.shared.persister.repair(&packed).await?)
    }

    /// Stop every worker. Pushes still queued are dropped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "replication worker ended abnormally");
            }
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("upstreams", &self.upstream_names())
            .field("registered", &self.registered().len())
            .finish()
    }
}

async fn run_push_loop(
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    info!("push worker started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("push worker shutting down");
                break;
            }
            packed = outbound.recv() => {
                let Some(packed) = packed else { break };
                shared.publish_everywhere(packed).await;
            }
        }
    }
}

async fn run_update_loop(
    shared: Arc<Shared>,
    peer: String,
    mut updates: mpsc::UnboundedReceiver<Notification>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            update = updates.recv() => {
                let Some(update) = update else {
                    debug!(peer = %peer, "update stream closed");
                    break;
                };
                match shared.pull(update.notification).await {
                    Ok(result) => debug!(
                        peer = %peer,
                        subscription = %update.subscription,
                        notification = %update.notification,
                        new = result.is_newly_stored(),
                        "update applied"
                    ),
                    Err(e) => warn!(peer = %peer, notification = %update.notification, error = %e, "update pull failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::PeerHandler;
    use crate::loopback::LoopbackTransport;
    use persist_crypto::{Author, WirePrimitive};
    use std::time::Duration;

    fn upstream(name: &str) -> (Arc<Persister>, Arc<dyn PeerTransport>) {
        let persister = Arc::new(Persister::in_memory());
        let transport: Arc<dyn PeerTransport> = Arc::new(LoopbackTransport::connect(
            name,
            PeerHandler::new(persister.clone()),
        ));
        (persister, transport)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// An upstream that already knows alice.
    async fn seeded_upstream() -> (Arc<Persister>, Arc<dyn PeerTransport>, Author) {
        let (persister, transport) = upstream("seeded");
        let alice = Author::generate();
        persister
            .ingest(&alice.declaration().pack().unwrap(), true)
            .await
            .unwrap();
        (persister, transport, alice)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn local_ingest_is_pushed_upstream() {
        let (remote, transport) = upstream("a");
        let local = Arc::new(Persister::in_memory());
        let replicator = Replicator::spawn(local.clone());
        replicator.add_upstream(transport).await.unwrap();

        let alice = Author::generate();
        local
            .ingest(&alice.declaration().pack().unwrap(), true)
            .await
            .unwrap();
        eventually(|| remote.contains(&alice.address())).await;
        replicator.shutdown().await;
    }

    #[tokio::test]
    async fn remote_ingest_is_not_pushed_back() {
        let (remote, transport) = upstream("a");
        let local = Arc::new(Persister::in_memory());
        let replicator = Replicator::spawn(local.clone());
        replicator.add_upstream(transport).await.unwrap();

        let alice = Author::generate();
        let bob = Author::generate();
        local.ingest(&alice.declaration().pack().unwrap(), false).await.unwrap();
        local.ingest(&bob.declaration().pack().unwrap(), true).await.unwrap();
        eventually(|| remote.contains(&bob.address())).await;
        assert!(!remote.contains(&alice.address()));
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pull_without_upstreams_is_unavailable() {
        let replicator = Replicator::spawn(Arc::new(Persister::in_memory()));
        let err = replicator.pull(Address::from_bytes(b"x")).await.unwrap_err();
        assert!(matches!(err, RemoteError::UnavailableUpstream(_)));
    }

    #[tokio::test]
    async fn pull_takes_the_first_upstream_that_has_it() {
        let (_, empty) = upstream("empty");
        let (_, seeded, alice) = seeded_upstream().await;
        let local = Arc::new(Persister::in_memory());
        let replicator = Replicator::spawn(local.clone());
        replicator.add_upstream(empty).await.unwrap();
        replicator.add_upstream(seeded).await.unwrap();

        let result = replicator.pull(alice.address()).await.unwrap();
        assert!(result.is_newly_stored());
        assert!(local.contains(&alice.address()));

        let err = replicator.pull(Address::from_bytes(b"nowhere")).await.unwrap_err();
        assert!(matches!(err, RemoteError::UnavailableUpstream(_)));
    }

    #[tokio::test]
    async fn pulled_frame_brings_its_target() {
        let (remote, transport, alice) = seeded_upstream().await;
        let container = alice.container(b"doc".to_vec());
        let dynamic = alice.dynamic_address(b"doc");
        let frame = alice.bind_dynamic(b"doc", container.address(), vec![]);
        remote.ingest(&frame.pack().unwrap(), true).await.unwrap();
        remote.ingest(&container.pack().unwrap(), true).await.unwrap();

        let local = Arc::new(Persister::in_memory());
        let replicator = Replicator::spawn(local.clone());
        replicator.add_upstream(transport).await.unwrap();
        replicator.pull(alice.address()).await.unwrap();

        let result = replicator.pull(dynamic).await.unwrap();
        assert!(result.is_newly_stored());
        assert_eq!(local.resolve_current_frame(&dynamic), Some(frame.frame()));
        assert!(local.contains(&container.address()));
    }

    // -----------------------------------------------------------------------
    // Subscriptions and repair
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn registered_address_follows_upstream_updates() {
        let (remote, transport, alice) = seeded_upstream().await;
        let container = alice.container(b"v1".to_vec());
        let dynamic = alice.dynamic_address(b"feed");
        let first = alice.bind_dynamic(b"feed", container.address(), vec![]);
        remote.ingest(&first.pack().unwrap(), true).await.unwrap();
        remote.ingest(&container.pack().unwrap(), true).await.unwrap();

        let local = Arc::new(Persister::in_memory());
        let replicator = Replicator::spawn(local.clone());
        replicator.add_upstream(transport).await.unwrap();
        replicator.pull(alice.address()).await.unwrap();
        replicator.pull(dynamic).await.unwrap();
        assert_eq!(replicator.register(dynamic).await, 1);
        assert_eq!(replicator.registered(), vec![dynamic]);

        let second = alice.bind_dynamic(b"feed", container.address(), vec![first.frame()]);
        remote.ingest(&second.pack().unwrap(), true).await.unwrap();

        eventually(|| local.resolve_current_frame(&dynamic) == Some(second.frame())).await;
        replicator.deregister(dynamic).await;
        assert!(replicator.registered().is_empty());
        replicator.shutdown().await;
    }

    #[tokio::test]
    async fn refetch_repairs_a_corrupted_copy() {
        let (_, transport, alice) = seeded_upstream().await;
        let local = Arc::new(Persister::in_memory());
        let replicator = Replicator::spawn(local.clone());
        replicator.add_upstream(transport).await.unwrap();
        replicator.pull(alice.address()).await.unwrap();

        local.store().put(alice.address(), b"corrupt").unwrap();
        assert!(local.verify_cached(&alice.address()).is_err());

        assert_eq!(replicator.refetch(alice.address()).await.unwrap(), alice.address());
        assert!(local.verify_cached(&alice.address()).is_ok());
    }

    #[tokio::test]
    async fn upstreams_can_be_removed() {
        let (_, transport) = upstream("gone");
        let replicator = Replicator::spawn(Arc::new(Persister::in_memory()));
        replicator.add_upstream(transport).await.unwrap();
        assert_eq!(replicator.upstream_names(), vec!["gone".to_string()]);
        assert!(replicator.remove_upstream("gone").await);
        assert!(!replicator.remove_upstream("gone").await);
        assert!(replicator.upstream_names().is_empty());
    }
}
