use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use persist_ledger::Ledger;
use persist_types::{Address, Summary};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::subscriber::{Notification, Subscriber};
use crate::work::WorkTracker;

/// Handle returned by [`PostOffice::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PostalStats {
    pub delivered: u64,
    pub failed: u64,
}

/// State shared with the delivery worker.
#[derive(Default)]
struct Mailroom {
    subscriptions: RwLock<HashMap<Address, Vec<(SubscriptionId, Arc<dyn Subscriber>)>>>,
    work: WorkTracker,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Mailroom {
    fn subscribers_of(&self, subscription: &Address) -> Vec<Arc<dyn Subscriber>> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subscription)
            .map(|subs| subs.iter().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default()
    }

    fn deliver(&self, item: Notification) {
        for subscriber in self.subscribers_of(&item.subscription) {
            match subscriber.deliver(item.subscription, item.notification) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = %item.subscription,
                        notification = %item.notification,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        }
    }
}

/// Notification scheduler.
///
/// Decides which ingested or removed primitives produce notifications and
/// delivers them, one at a time and in scheduling order, on a background
/// worker.
pub struct PostOffice {
    ledger: Arc<Ledger>,
    mailroom: Arc<Mailroom>,
    queue: mpsc::UnboundedSender<Notification>,
    /// Notifications waiting for their target container, keyed by target.
    deferred: Mutex<HashMap<Address, Vec<Notification>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PostOffice {
    /// Start the delivery worker. Must be called within a tokio runtime.
    pub fn spawn(ledger: Arc<Ledger>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let mailroom = Arc::new(Mailroom::default());
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_delivery_loop(mailroom.clone(), rx, cancel.clone()));

        Self {
            ledger,
            mailroom,
            queue,
            deferred: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn enqueue(&self, item: Notification) {
        if !self.mailroom.work.begin() {
            debug!(subscription = %item.subscription, "post office closed, notification dropped");
            return;
        }
        if self.queue.send(item).is_err() {
            self.mailroom.work.finish();
        }
    }

    /// Drop notifications still waiting on behalf of `dynamic`.
    fn drop_deferred(&self, dynamic: &Address) {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, items| {
                items.retain(|item| item.subscription != *dynamic);
                !items.is_empty()
            });
    }

    fn release_deferred(&self, target: &Address) {
        let released = self
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
        for item in released.into_iter().flatten() {
            self.enqueue(item);
        }
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Schedule notifications for a newly ingested primitive.
    pub fn schedule(&self, summary: &Summary) {
        match summary {
            Summary::Container { address, .. } => self.release_deferred(address),
            Summary::DynamicBinding {
                address,
                frame,
                target,
                ..
            } => {
                // A newer frame supersedes whatever an earlier one left waiting.
                self.drop_deferred(address);
                let item = Notification::new(*address, *frame);
                if self.ledger.contains(target) {
                    self.enqueue(item);
                } else {
                    debug!(dynamic = %address, target = %target, "notification deferred until target arrives");
                    self.deferred
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(*target)
                        .or_default()
                        .push(item);
                }
            }
            Summary::Request {
                address, recipient, ..
            } => self.enqueue(Notification::new(*recipient, *address)),
            Summary::Identity { .. } | Summary::StaticBinding { .. } | Summary::Debinding { .. } => {}
        }
    }

    /// Schedule notifications for a primitive the collector removed, one per
    /// debinding that removed it.
    pub fn schedule_removal(&self, summary: &Summary, debindings: &[Address]) {
        let subscription = match summary {
            Summary::DynamicBinding { address, .. } => {
                self.drop_deferred(address);
                *address
            }
            Summary::Request { recipient, .. } => *recipient,
            _ => return,
        };
        for debinding in debindings {
            self.enqueue(Notification::new(subscription, *debinding));
        }
    }

    /// Number of notifications waiting on a missing target.
    pub fn deferred_count(&self) -> usize {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Register a subscriber. Requests already waiting for `address` are
    /// scheduled again so the new subscriber sees them.
    pub fn subscribe(&self, address: Address, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.mailroom
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address)
            .or_default()
            .push((id, subscriber));
        debug!(subscription = %address, "subscribed");

        for request in self.ledger.recipient_requests(&address) {
            self.enqueue(Notification::new(address, request));
        }
        id
    }

    /// Remove one subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, address: &Address, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .mailroom
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(subs) = subscriptions.get_mut(address) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(existing, _)| *existing != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            subscriptions.remove(address);
        }
        removed
    }

    /// Every address with at least one subscriber, sorted.
    pub fn list_subscriptions(&self) -> Vec<Address> {
        let subscriptions = self
            .mailroom
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Address> = subscriptions.keys().copied().collect();
        out.sort();
        out
    }

    pub fn subscriber_count(&self, address: &Address) -> usize {
        self.mailroom.subscribers_of(address).len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> PostalStats {
        PostalStats {
            delivered: self.mailroom.delivered.load(Ordering::Relaxed),
            failed: self.mailroom.failed.load(Ordering::Relaxed),
        }
    }

    /// Resolve once every scheduled notification has been delivered.
    pub async fn await_idle(&self) {
        self.mailroom.work.wait_idle().await;
    }

    /// Stop accepting notifications. With `drain`, deliver everything already
    /// queued first; otherwise queued notifications are dropped.
    pub async fn shutdown(&self, drain: bool) {
        self.mailroom.work.close();
        if drain {
            self.mailroom.work.wait_idle().await;
        }
        self.cancel.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "notification worker ended abnormally");
            }
        }
        self.mailroom.work.abandon();
    }
}

impl Drop for PostOffice {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PostOffice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostOffice")
            .field("subscriptions", &self.list_subscriptions().len())
            .field("pending", &self.mailroom.work.pending())
            .field("deferred", &self.deferred_count())
            .finish()
    }
}

async fn run_delivery_loop(
    mailroom: Arc<Mailroom>,
    mut rx: mpsc::UnboundedReceiver<Notification>,
    cancel: CancellationToken,
) {
    info!("notification worker started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("notification worker shutting down");
                break;
            }
            item = rx.recv() => {
                let Some(item) = item else { break };
                mailroom.deliver(item);
                mailroom.work.finish();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::subscriber::ChannelSubscriber;
    use std::sync::atomic::AtomicUsize;

    fn addr(seed: u8) -> Address {
        Address::from_hash([seed; 32])
    }

    fn container(seed: u8) -> Summary {
        Summary::Container {
            address: addr(seed),
            author: addr(1),
        }
    }

    fn dynamic(address: u8, frame: u8, target: u8) -> Summary {
        Summary::DynamicBinding {
            address: addr(address),
            frame: addr(frame),
            author: addr(1),
            target: addr(target),
            history: vec![],
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    // -----------------------------------------------------------------------
    // Scheduling rules
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dynamic_frame_with_present_target_notifies() {
        let ledger = Arc::new(Ledger::new());
        ledger.place(container(20)).unwrap();
        let office = PostOffice::spawn(ledger);
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(5), Arc::new(sub));

        office.schedule(&dynamic(5, 50, 20));
        office.await_idle().await;
        assert_eq!(drain(&mut rx), vec![Notification::new(addr(5), addr(50))]);
    }

    #[tokio::test]
    async fn dynamic_frame_waits_for_missing_target() {
        let ledger = Arc::new(Ledger::new());
        let office = PostOffice::spawn(ledger.clone());
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(5), Arc::new(sub));

        office.schedule(&dynamic(5, 50, 20));
        office.await_idle().await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(office.deferred_count(), 1);

        ledger.place(container(20)).unwrap();
        office.schedule(&container(20));
        office.await_idle().await;
        assert_eq!(drain(&mut rx), vec![Notification::new(addr(5), addr(50))]);
        assert_eq!(office.deferred_count(), 0);
    }

    #[tokio::test]
    async fn newer_frame_drops_stale_deferred_notification() {
        let ledger = Arc::new(Ledger::new());
        ledger.place(container(21)).unwrap();
        let office = PostOffice::spawn(ledger.clone());
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(5), Arc::new(sub));

        office.schedule(&dynamic(5, 50, 20));
        office.await_idle().await;
        assert_eq!(office.deferred_count(), 1);

        office.schedule(&dynamic(5, 51, 21));
        office.await_idle().await;
        assert_eq!(drain(&mut rx), vec![Notification::new(addr(5), addr(51))]);
        assert_eq!(office.deferred_count(), 0);

        ledger.place(container(20)).unwrap();
        office.schedule(&container(20));
        office.await_idle().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn deferred_frames_of_other_dynamics_survive() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        office.schedule(&dynamic(5, 50, 20));
        office.schedule(&dynamic(6, 60, 20));
        office.schedule(&dynamic(5, 52, 22));
        office.await_idle().await;
        assert_eq!(office.deferred_count(), 2);
    }

    #[tokio::test]
    async fn static_bindings_and_identities_never_notify() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(1), Arc::new(sub));

        office.schedule(&Summary::Identity {
            address: addr(1),
            signing_key: [0; 32],
        });
        office.schedule(&Summary::StaticBinding {
            address: addr(2),
            author: addr(1),
            target: addr(1),
        });
        office.await_idle().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn request_notifies_recipient() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(9), Arc::new(sub));

        let request = Summary::Request {
            address: addr(30),
            recipient: addr(9),
        };
        office.schedule(&request);
        office.schedule_removal(&request, &[addr(31)]);
        office.await_idle().await;
        assert_eq!(
            drain(&mut rx),
            vec![
                Notification::new(addr(9), addr(30)),
                Notification::new(addr(9), addr(31)),
            ]
        );
    }

    #[tokio::test]
    async fn removal_notifies_once_per_debinding() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(5), Arc::new(sub));

        office.schedule_removal(&dynamic(5, 50, 20), &[addr(60), addr(61)]);
        office.await_idle().await;
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn subscribing_replays_outstanding_requests() {
        let ledger = Arc::new(Ledger::new());
        ledger
            .place(Summary::Request {
                address: addr(30),
                recipient: addr(9),
            })
            .unwrap();
        let office = PostOffice::spawn(ledger);
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(9), Arc::new(sub));
        office.await_idle().await;
        assert_eq!(drain(&mut rx), vec![Notification::new(addr(9), addr(30))]);
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failing_subscriber_does_not_block_others() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        let failing = |_: Address, _: Address| -> Result<(), DeliveryError> {
            Err(DeliveryError::Refused("nope".into()))
        };
        office.subscribe(addr(9), Arc::new(failing));
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(9), Arc::new(sub));

        office.schedule(&Summary::Request {
            address: addr(30),
            recipient: addr(9),
        });
        office.await_idle().await;
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(office.stats(), PostalStats { delivered: 1, failed: 1 });
    }

    #[tokio::test]
    async fn delivery_preserves_order_per_subscription() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(9), Arc::new(sub));
        for seed in 30..40 {
            office.schedule(&Summary::Request {
                address: addr(seed),
                recipient: addr(9),
            });
        }
        office.await_idle().await;
        let seen: Vec<Address> = drain(&mut rx).into_iter().map(|n| n.notification).collect();
        let expected: Vec<Address> = (30..40).map(addr).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = office.subscribe(
            addr(9),
            Arc::new(move |_: Address, _: Address| -> Result<(), DeliveryError> {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        assert_eq!(office.list_subscriptions(), vec![addr(9)]);
        assert!(office.unsubscribe(&addr(9), id));
        assert!(!office.unsubscribe(&addr(9), id));
        assert!(office.list_subscriptions().is_empty());

        office.schedule(&Summary::Request {
            address: addr(30),
            recipient: addr(9),
        });
        office.await_idle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn drained_shutdown_delivers_everything() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        let (sub, mut rx) = ChannelSubscriber::channel();
        office.subscribe(addr(9), Arc::new(sub));
        for seed in 30..35 {
            office.schedule(&Summary::Request {
                address: addr(seed),
                recipient: addr(9),
            });
        }
        office.shutdown(true).await;
        assert_eq!(drain(&mut rx).len(), 5);

        office.schedule(&Summary::Request {
            address: addr(40),
            recipient: addr(9),
        });
        office.await_idle().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn abandoning_shutdown_returns_promptly() {
        let office = PostOffice::spawn(Arc::new(Ledger::new()));
        office.shutdown(false).await;
        office.await_idle().await;
    }
}
