use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use persist_ledger::Ledger;
use persist_postal::{PostOffice, WorkTracker};
use persist_store::ContentStore;
use persist_types::{Address, Summary};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GcError;

/// One address to re-evaluate, and the debinding that prompted it, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcTask {
    pub address: Address,
    pub trigger: Option<Address>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub evaluated: u64,
    pub collected: u64,
}

/// State shared with the collection worker.
struct Crypt {
    ledger: Arc<Ledger>,
    store: Arc<dyn ContentStore>,
    postal: Arc<PostOffice>,
    /// Serializes collection against ingestion.
    ops: Arc<tokio::sync::Mutex<()>>,
    work: WorkTracker,
    evaluated: AtomicU64,
    collected: AtomicU64,
}

impl Crypt {
    /// Evaluate a task and everything it cascades into.
    fn process(&self, task: GcTask) {
        let mut queue = VecDeque::from([task.address]);
        let mut seen = HashSet::new();
        if let Some(trigger) = task.trigger {
            debug!(address = %task.address, trigger = %trigger, "gc triggered by debinding");
        }

        while let Some(address) = queue.pop_front() {
            if !seen.insert(address) {
                continue;
            }
            queue.extend(self.evaluate(&address));
            queue.extend(self.ledger.take_illegal());
        }
    }

    /// Collect `address` if nothing keeps it alive. Returns follow-up
    /// addresses to evaluate.
    fn evaluate(&self, address: &Address) -> Vec<Address> {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
        let Some(summary) = self.ledger.summary(address) else {
            return Vec::new();
        };
        let primary = summary.address();
        let ledger = &self.ledger;

        let doomed = match &summary {
            Summary::Identity { .. } => false,
            Summary::Container { .. } => !ledger.is_bound(&primary),
            Summary::StaticBinding { .. } | Summary::Request { .. } => ledger.is_debound(&primary),
            Summary::DynamicBinding { .. } => {
                ledger.is_debound(&primary) && !ledger.is_bound(&primary)
            }
            Summary::Debinding { .. } => {
                ledger.is_debound(&primary) || ledger.is_illegal(&primary)
            }
        };
        if !doomed {
            return Vec::new();
        }

        match self.collect(&summary) {
            Ok(()) => match &summary {
                Summary::StaticBinding { target, .. } | Summary::DynamicBinding { target, .. } => {
                    vec![*target]
                }
                _ => Vec::new(),
            },
            Err(e) => {
                warn!(address = %primary, error = %e, "collection failed");
                Vec::new()
            }
        }
    }

    fn collect(&self, summary: &Summary) -> Result<(), GcError> {
        let primary = summary.address();
        let debindings = self.ledger.debindings_of(&primary);
        self.ledger.force_gc(&primary)?;

        let stored = summary.storage_address();
        match self.store.delete(&stored) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(address = %stored, "collected object was not in the store");
            }
            Err(e) => return Err(e.into()),
        }

        self.postal.schedule_removal(summary, &debindings);
        self.collected.fetch_add(1, Ordering::Relaxed);
        debug!(address = %primary, kind = %summary.kind(), "collected");
        Ok(())
    }
}

/// Garbage collection worker.
///
/// Tasks are processed one at a time, each under the shared operations
/// lock, so collection always sees the ledger state the ingestion path
/// just wrote.
pub struct Undertaker {
    crypt: Arc<Crypt>,
    queue: mpsc::UnboundedSender<GcTask>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Undertaker {
    /// Start the collection worker. Must be called within a tokio runtime.
    pub fn spawn(
        ledger: Arc<Ledger>,
        store: Arc<dyn ContentStore>,
        postal: Arc<PostOffice>,
        ops: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        let crypt = Arc::new(Crypt {
            ledger,
            store,
            postal,
            ops,
            work: WorkTracker::new(),
            evaluated: AtomicU64::new(0),
            collected: AtomicU64::new(0),
        });
        let (queue, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_gc_loop(crypt.clone(), rx, cancel.clone()));
        Self {
            crypt,
            queue,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue `address` for re-evaluation.
    pub fn triage(&self, address: Address, trigger: Option<Address>) {
        if !self.crypt.work.begin() {
            debug!(address = %address, "collector closed, triage dropped");
            return;
        }
        if self.queue.send(GcTask { address, trigger }).is_err() {
            self.crypt.work.finish();
        }
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            evaluated: self.crypt.evaluated.load(Ordering::Relaxed),
            collected: self.crypt.collected.load(Ordering::Relaxed),
        }
    }

    /// Resolve once every queued task and its cascade has been processed.
    pub async fn await_idle(&self) {
        self.crypt.work.wait_idle().await;
    }

    /// Stop accepting tasks. With `drain`, finish queued tasks first.
    pub async fn shutdown(&self, drain: bool) {
        self.crypt.work.close();
        if drain {
            self.crypt.work.wait_idle().await;
        }
        self.cancel.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "gc worker ended abnormally");
            }
        }
        self.crypt.work.abandon();
    }
}

impl Drop for Undertaker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Undertaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Undertaker")
            .field("pending", &self.crypt.work.pending())
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run_gc_loop(
    crypt: Arc<Crypt>,
    mut rx: mpsc::UnboundedReceiver<GcTask>,
    cancel: CancellationToken,
) {
    info!("gc worker started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("gc worker shutting down");
                break;
            }
            task = rx.recv() => {
                let Some(task) = task else { break };
                {
                    let _ops = crypt.ops.lock().await;
                    crypt.process(task);
                }
                crypt.work.finish();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persist_postal::ChannelSubscriber;
    use persist_store::MemoryStore;

    fn addr(seed: u8) -> Address {
        Address::from_hash([seed; 32])
    }

    struct Fixture {
        ledger: Arc<Ledger>,
        store: Arc<MemoryStore>,
        postal: Arc<PostOffice>,
        undertaker: Undertaker,
    }

    impl Fixture {
        fn new() -> Self {
            let ledger = Arc::new(Ledger::new());
            let store = Arc::new(MemoryStore::new());
            let postal = Arc::new(PostOffice::spawn(ledger.clone()));
            let undertaker = Undertaker::spawn(
                ledger.clone(),
                store.clone(),
                postal.clone(),
                Arc::new(tokio::sync::Mutex::new(())),
            );
            Self {
                ledger,
                store,
                postal,
                undertaker,
            }
        }

        fn place(&self, summary: Summary) {
            self.store
                .put(summary.storage_address(), summary.storage_address().as_bytes())
                .unwrap();
            self.ledger.place(summary).unwrap();
        }

        async fn settle(&self) {
            self.undertaker.await_idle().await;
            self.postal.await_idle().await;
        }

        fn stored(&self, address: Address) -> bool {
            self.store.contains(&address).unwrap()
        }
    }

    fn binding(seed: u8, target: Address) -> Summary {
        Summary::StaticBinding {
            address: addr(seed),
            author: addr(1),
            target,
        }
    }

    fn debinding(seed: u8, target: Address) -> Summary {
        Summary::Debinding {
            address: addr(seed),
            author: addr(1),
            target,
        }
    }

    fn container(seed: u8) -> Summary {
        Summary::Container {
            address: addr(seed),
            author: addr(1),
        }
    }

    // -----------------------------------------------------------------------
    // Collection rules
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn identities_are_never_collected() {
        let fx = Fixture::new();
        fx.place(Summary::Identity {
            address: addr(1),
            signing_key: [1; 32],
        });
        fx.undertaker.triage(addr(1), None);
        fx.settle().await;
        assert!(fx.stored(addr(1)));
        assert_eq!(fx.undertaker.stats().collected, 0);
    }

    #[tokio::test]
    async fn bound_container_survives() {
        let fx = Fixture::new();
        fx.place(binding(10, addr(20)));
        fx.place(container(20));
        fx.undertaker.triage(addr(20), None);
        fx.settle().await;
        assert!(fx.stored(addr(20)));
    }

    #[tokio::test]
    async fn debinding_cascades_to_container() {
        let fx = Fixture::new();
        fx.place(binding(10, addr(20)));
        fx.place(container(20));
        fx.place(debinding(11, addr(10)));

        fx.undertaker.triage(addr(10), Some(addr(11)));
        fx.settle().await;

        assert!(!fx.stored(addr(10)));
        assert!(!fx.stored(addr(20)));
        assert!(fx.stored(addr(11)));
        assert!(!fx.ledger.contains(&addr(20)));
        assert_eq!(fx.undertaker.stats().collected, 2);
    }

    #[tokio::test]
    async fn second_binding_keeps_container_alive() {
        let fx = Fixture::new();
        fx.place(binding(10, addr(20)));
        fx.place(binding(12, addr(20)));
        fx.place(container(20));
        fx.place(debinding(11, addr(10)));

        fx.undertaker.triage(addr(10), Some(addr(11)));
        fx.settle().await;

        assert!(!fx.stored(addr(10)));
        assert!(fx.stored(addr(20)));
    }

    #[tokio::test]
    async fn debound_debinding_is_collected() {
        let fx = Fixture::new();
        fx.place(binding(10, addr(20)));
        fx.place(debinding(11, addr(10)));
        fx.place(debinding(12, addr(11)));

        fx.undertaker.triage(addr(11), Some(addr(12)));
        fx.settle().await;
        assert!(!fx.stored(addr(11)));
        assert!(fx.stored(addr(12)));
    }

    #[tokio::test]
    async fn illegal_debinding_is_collected() {
        let fx = Fixture::new();
        // Staged by a stranger, then demoted when the binding arrives.
        fx.place(Summary::Debinding {
            address: addr(11),
            author: addr(9),
            target: addr(10),
        });
        fx.place(binding(10, addr(20)));
        assert!(!fx.ledger.is_debound(&addr(10)));

        fx.undertaker.triage(addr(10), None);
        fx.settle().await;
        assert!(!fx.stored(addr(11)));
        assert!(fx.stored(addr(10)));
    }

    #[tokio::test]
    async fn dynamic_binding_removal_notifies_subscribers() {
        let fx = Fixture::new();
        let (sub, mut rx) = ChannelSubscriber::channel();
        fx.postal.subscribe(addr(5), Arc::new(sub));

        fx.place(Summary::DynamicBinding {
            address: addr(5),
            frame: addr(50),
            author: addr(1),
            target: addr(20),
            history: vec![],
        });
        fx.place(container(20));
        fx.place(debinding(11, addr(5)));

        fx.undertaker.triage(addr(5), Some(addr(11)));
        fx.settle().await;

        assert!(!fx.stored(addr(50)));
        assert!(!fx.stored(addr(20)));
        let note = rx.try_recv().unwrap();
        assert_eq!((note.subscription, note.notification), (addr(5), addr(11)));
    }

    #[tokio::test]
    async fn unknown_address_is_ignored() {
        let fx = Fixture::new();
        fx.undertaker.triage(addr(99), None);
        fx.settle().await;
        assert_eq!(fx.undertaker.stats().evaluated, 1);
        assert_eq!(fx.undertaker.stats().collected, 0);
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let fx = Fixture::new();
        fx.place(container(20));
        fx.undertaker.shutdown(true).await;
        fx.undertaker.triage(addr(20), None);
        fx.undertaker.await_idle().await;
        assert!(fx.stored(addr(20)));
    }
}
