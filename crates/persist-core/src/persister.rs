use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use persist_crypto::VerifyingKey;
use persist_gc::{GcStats, Undertaker};
use persist_ledger::Ledger;
use persist_postal::{PostOffice, PostalStats, Subscriber, SubscriptionId};
use persist_store::ContentStore;
use persist_types::{Address, PrimitiveKind, Rejection, Summary};
use persist_verify::{Parsed, Verifier};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::builder::PersisterBuilder;
use crate::config::PersisterConfig;
use crate::error::{PersistError, PersistResult};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of a single ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestResult {
    /// Verified, stored and recorded.
    NewlyStored(Summary),
    /// These exact bytes were already held. Nothing changed.
    AlreadyKnown(Address),
    Rejected(Rejection),
}

impl IngestResult {
    pub fn is_newly_stored(&self) -> bool {
        matches!(self, Self::NewlyStored(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Outcome of a cold-start restore.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub already_known: usize,
    /// Files that failed verification. They stay on disk.
    pub rejected: Vec<(Address, Rejection)>,
    /// Files that parse as no primitive.
    pub malformed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Live { remotable: bool },
    /// Replaying the store. Nothing is written back or pushed upstream.
    Restore,
}

// ---------------------------------------------------------------------------
// Persister
// ---------------------------------------------------------------------------

/// The ingestion coordinator.
///
/// Every primitive, local or remote, enters through [`ingest`](Self::ingest):
/// parse, verify, store, record, then hand off to the collector and the post
/// office. Ingestion is serialized by an operations lock that the collector
/// also takes for each task.
pub struct Persister {
    config: PersisterConfig,
    ledger: Arc<Ledger>,
    store: Arc<dyn ContentStore>,
    verifier: Verifier,
    postal: Arc<PostOffice>,
    undertaker: Undertaker,
    ops: Arc<tokio::sync::Mutex<()>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    suspects: Mutex<HashSet<Address>>,
}

impl Persister {
    pub fn builder() -> PersisterBuilder {
        PersisterBuilder::new()
    }

    /// Memory-backed persister with default rules.
    pub fn in_memory() -> Self {
        let config = PersisterConfig::in_memory();
        let verifier = Verifier::with_default_stages(config.verify.clone());
        Self::assemble(config, Arc::new(persist_store::MemoryStore::new()), verifier)
    }

    /// Build from configuration and restore whatever the store holds.
    pub async fn open(config: PersisterConfig) -> PersistResult<Self> {
        let persister = PersisterBuilder::new().config(config).build()?;
        let report = persister.restore().await?;
        info!(
            restored = report.restored,
            rejected = report.rejected.len(),
            malformed = report.malformed,
            "persister opened"
        );
        Ok(persister)
    }

    pub(crate) fn assemble(
        config: PersisterConfig,
        store: Arc<dyn ContentStore>,
        verifier: Verifier,
    ) -> Self {
        let ledger = Arc::new(Ledger::new());
        let ops = Arc::new(tokio::sync::Mutex::new(()));
        let postal = Arc::new(PostOffice::spawn(ledger.clone()));
        let undertaker = Undertaker::spawn(ledger.clone(), store.clone(), postal.clone(), ops.clone());
        Self {
            config,
            ledger,
            store,
            verifier,
            postal,
            undertaker,
            ops,
            outbound: Mutex::new(None),
            suspects: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &PersisterConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Ingest packed primitive bytes.
    ///
    /// `remotable` is false for bytes that came from another persister, so
    /// they are not pushed back upstream.
    pub async fn ingest(&self, packed: &[u8], remotable: bool) -> PersistResult<IngestResult> {
        let parsed = match self.verifier.parse(packed) {
            Ok(parsed) => parsed,
            Err(rejection) => {
                debug!(reason = %rejection, "unparseable primitive");
                return Ok(IngestResult::Rejected(rejection));
            }
        };
        self.admit(parsed, Mode::Live { remotable }).await
    }

    async fn admit(&self, parsed: Parsed, mode: Mode) -> PersistResult<IngestResult> {
        let _ops = self.ops.lock().await;
        let summary = parsed.summary.clone();
        let stored_at = summary.storage_address();

        if self.ledger.knows(&summary) {
            debug!(address = %stored_at, "already known");
            return Ok(IngestResult::AlreadyKnown(stored_at));
        }

        self.load_party(&summary)?;
        let verdict = self.verifier.verify(&parsed, &self.ledger)?;
        for illegal in self.ledger.take_illegal() {
            self.undertaker.triage(illegal, None);
        }
        if let Some(rejection) = verdict.rejection {
            return Ok(IngestResult::Rejected(rejection));
        }

        if mode != Mode::Restore {
            self.store.put(stored_at, &parsed.packed)?;
        }
        let superseded = match self.ledger.place(summary.clone()) {
            Ok(superseded) => superseded,
            Err(e) => {
                if mode != Mode::Restore {
                    self.discard(&stored_at);
                }
                return Err(e.into());
            }
        };
        if let Some(old) = &superseded {
            self.retire_frame(old, &summary);
        }
        if let Summary::Debinding { address, target, .. } = &summary {
            self.undertaker.triage(*target, Some(*address));
        }
        self.postal.schedule(&summary);

        if mode == (Mode::Live { remotable: true }) {
            self.push_outbound(parsed.packed);
        }
        debug!(address = %stored_at, kind = %summary.kind(), "ingested");
        Ok(IngestResult::NewlyStored(summary))
    }

    /// Drop the bytes of a replaced frame, and re-evaluate the old target if
    /// the new frame moved away from it.
    fn retire_frame(&self, old: &Summary, new: &Summary) {
        let old_frame = old.storage_address();
        match self.store.delete(&old_frame) {
            Ok(()) => debug!(frame = %old_frame, "superseded frame removed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(frame = %old_frame, error = %e, "failed to remove superseded frame"),
        }
        if let (Some(old_target), Some(new_target)) = (old.target(), new.target()) {
            if old_target != new_target {
                self.undertaker.triage(old_target, None);
            }
        }
    }

    fn discard(&self, address: &Address) {
        if let Err(e) = self.store.delete(address) {
            warn!(address = %address, error = %e, "failed to discard unrecorded bytes");
        }
    }

    /// Load the author or recipient from the store if the ledger does not
    /// know it yet.
    fn load_party(&self, summary: &Summary) -> PersistResult<()> {
        let Some(party) = summary.party() else {
            return Ok(());
        };
        if self.ledger.contains(&party) {
            return Ok(());
        }
        let packed = match self.store.get(&party) {
            Ok(packed) => packed,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let parsed = match self.verifier.parse(&packed) {
            Ok(parsed) if parsed.summary.kind() == PrimitiveKind::Identity => parsed,
            Ok(_) => return Ok(()),
            Err(rejection) => {
                warn!(address = %party, reason = %rejection, "stored identity is malformed");
                return Ok(());
            }
        };
        if self.verifier.verify(&parsed, &self.ledger)?.is_accepted() {
            debug!(address = %party, "identity loaded from store");
            self.ledger.place(parsed.summary)?;
        }
        Ok(())
    }

    fn push_outbound(&self, packed: Vec<u8>) {
        let mut outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = outbound.as_ref() {
            if sender.send(packed).is_err() {
                debug!("outbound queue closed");
                *outbound = None;
            }
        }
    }

    /// Receive every locally ingested primitive from now on. Replaces any
    /// earlier receiver.
    pub fn attach_outbound(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Packed bytes for `address`. Dynamic addresses resolve to their
    /// current frame.
    pub fn retrieve(&self, address: &Address) -> PersistResult<Vec<u8>> {
        let stored_at = self.ledger.resolve_current_frame(address).unwrap_or(*address);
        if self.is_suspect(&stored_at) {
            return Err(PersistError::Integrity {
                address: stored_at,
                reason: "flagged for repair".into(),
            });
        }
        match self.store.get(&stored_at) {
            Ok(packed) => Ok(packed),
            Err(e) if e.is_not_found() => Err(PersistError::DoesNotExist(*address)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn summarize(&self, address: &Address) -> Option<Summary> {
        self.ledger.summary(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.ledger.contains(address)
    }

    pub fn bindings_of(&self, address: &Address) -> Vec<Address> {
        self.ledger.bindings_of(address)
    }

    pub fn debindings_of(&self, address: &Address) -> Vec<Address> {
        self.ledger.debindings_of(address)
    }

    pub fn resolve_current_frame(&self, dynamic: &Address) -> Option<Address> {
        self.ledger.resolve_current_frame(dynamic)
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn subscribe(&self, address: Address, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.postal.subscribe(address, subscriber)
    }

    pub fn unsubscribe(&self, address: &Address, id: SubscriptionId) -> bool {
        self.postal.unsubscribe(address, id)
    }

    pub fn list_subscriptions(&self) -> Vec<Address> {
        self.postal.list_subscriptions()
    }

    pub fn postal_stats(&self) -> PostalStats {
        self.postal.stats()
    }

    pub fn gc_stats(&self) -> GcStats {
        self.undertaker.stats()
    }

    // -----------------------------------------------------------------------
    // Restore
    // -----------------------------------------------------------------------

    /// Replay every stored primitive through verification, kind by kind.
    ///
    /// Rejected files are reported and left in place.
    pub async fn restore(&self) -> PersistResult<RestoreReport> {
        let mut report = RestoreReport::default();
        let buckets = self.load_buckets(&mut report)?;

        for bucket in buckets {
            for parsed in bucket {
                let stored_at = parsed.summary.storage_address();
                match self.admit(parsed, Mode::Restore).await? {
                    IngestResult::NewlyStored(_) => report.restored += 1,
                    IngestResult::AlreadyKnown(_) => report.already_known += 1,
                    IngestResult::Rejected(rejection) => {
                        warn!(address = %stored_at, reason = %rejection, "stored primitive rejected on restore");
                        report.rejected.push((stored_at, rejection));
                    }
                }
            }
        }

        info!(
            restored = report.restored,
            rejected = report.rejected.len(),
            malformed = report.malformed,
            "restore complete"
        );
        Ok(report)
    }

    /// Parse the whole store into one bucket per kind, in restore order.
    fn load_buckets(&self, report: &mut RestoreReport) -> PersistResult<Vec<Vec<Parsed>>> {
        let mut buckets: Vec<Vec<Parsed>> = vec![Vec::new(); PrimitiveKind::RESTORE_ORDER.len()];
        for packed in self.store.enumerate()? {
            let packed = packed?;
            match self.verifier.parse(&packed) {
                Ok(parsed) => {
                    let kind = parsed.summary.kind();
                    if let Some(slot) = PrimitiveKind::RESTORE_ORDER.iter().position(|k| *k == kind) {
                        buckets[slot].push(parsed);
                    }
                }
                Err(rejection) => {
                    warn!(reason = %rejection, "malformed file in store");
                    report.malformed += 1;
                }
            }
        }
        // Older frames first, so each frame finds its predecessor.
        for bucket in &mut buckets {
            bucket.sort_by_key(|parsed| match &parsed.summary {
                Summary::DynamicBinding { history, .. } => history.len(),
                _ => 0,
            });
        }
        Ok(buckets)
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    /// Re-check the stored bytes for `address` against its content address
    /// and signature. Failures flag the object for repair.
    pub fn verify_cached(&self, address: &Address) -> PersistResult<()> {
        let stored_at = self.ledger.resolve_current_frame(address).unwrap_or(*address);
        let packed = match self.store.get(&stored_at) {
            Ok(packed) => packed,
            Err(e) if e.is_not_found() => return Err(PersistError::DoesNotExist(*address)),
            Err(e) => return Err(e.into()),
        };

        let failure = match self.verifier.parse(&packed) {
            Err(rejection) => Some(rejection.reason),
            Ok(parsed) if parsed.summary.storage_address() != stored_at => Some(format!(
                "content hashes to {}",
                parsed.summary.storage_address().short_hex()
            )),
            Ok(parsed) => self.check_signature(&parsed).err(),
        };

        let mut suspects = self.suspects.lock().unwrap_or_else(PoisonError::into_inner);
        match failure {
            None => {
                suspects.remove(&stored_at);
                Ok(())
            }
            Some(reason) => {
                warn!(address = %stored_at, reason = %reason, "integrity check failed");
                suspects.insert(stored_at);
                Err(PersistError::Integrity {
                    address: stored_at,
                    reason,
                })
            }
        }
    }

    fn check_signature(&self, parsed: &Parsed) -> Result<(), String> {
        let Some(author) = parsed.summary.author() else {
            return Ok(());
        };
        let Some(Summary::Identity { signing_key, .. }) = self.ledger.summary(&author) else {
            return Ok(());
        };
        let key = VerifyingKey::decode(signing_key).map_err(|e| e.to_string())?;
        parsed.primitive.verify_signature(&key).map_err(|e| e.to_string())
    }

    pub fn is_suspect(&self, address: &Address) -> bool {
        self.suspects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address)
    }

    /// Objects flagged by [`verify_cached`](Self::verify_cached), sorted.
    pub fn suspects(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .suspects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        out.sort();
        out
    }

    /// Overwrite a flagged object with a verified copy.
    pub async fn repair(&self, packed: &[u8]) -> PersistResult<Address> {
        let parsed = self.verifier.parse(packed).map_err(PersistError::Rejected)?;
        let stored_at = parsed.summary.storage_address();
        if !self.is_suspect(&stored_at) {
            return Err(PersistError::NotSuspect(stored_at));
        }
        self.check_signature(&parsed).map_err(|reason| PersistError::Integrity {
            address: stored_at,
            reason,
        })?;

        let _ops = self.ops.lock().await;
        self.store.put(stored_at, packed)?;
        self.suspects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&stored_at);
        info!(address = %stored_at, "object repaired");
        Ok(stored_at)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Resolve once collection and delivery have caught up.
    pub async fn await_idle(&self) {
        self.undertaker.await_idle().await;
        self.postal.await_idle().await;
    }

    /// Stop both workers. With `drain`, queued work completes first.
    pub async fn shutdown(&self, drain: bool) {
        self.undertaker.shutdown(drain).await;
        self.postal.shutdown(drain).await;
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(drain, "persister shut down");
    }

    /// Shut down with the configured drain policy.
    pub async fn close(&self) {
        self.shutdown(self.config.drain_on_shutdown).await;
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("ledger", &self.ledger)
            .field("stages", &self.verifier.stage_count())
            .field("gc", &self.undertaker)
            .finish()
    }
}
