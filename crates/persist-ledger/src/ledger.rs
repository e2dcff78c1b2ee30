use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use persist_types::{rules, Address, Summary};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};

/// Shared lifetime ledger.
///
/// Every public method takes the lock once, so each call is one atomic
/// update as seen by other callers.
#[derive(Default)]
pub struct Ledger {
    inner: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    /// Live primitives by primary address (the dynamic address for dynamic
    /// bindings).
    catalog: HashMap<Address, Summary>,
    /// Current frame address → dynamic address.
    frame_owners: HashMap<Address, Address>,
    /// Target → bindings (static or dynamic) pointing at it.
    bound_by: HashMap<Address, HashSet<Address>>,
    /// Target → debindings checked against the known target.
    debound_by: HashMap<Address, HashSet<Address>>,
    /// Target → debindings recorded before the target was known.
    staged: HashMap<Address, HashSet<Address>>,
    /// Staged debindings that failed revalidation.
    illegal: HashSet<Address>,
    /// Illegal debindings not yet handed to the collector.
    newly_illegal: Vec<Address>,
    /// Recipient → requests addressed to it.
    requests_for: HashMap<Address, HashSet<Address>>,
}

fn sorted(set: Option<&HashSet<Address>>) -> Vec<Address> {
    let mut out: Vec<Address> = set.into_iter().flatten().copied().collect();
    out.sort();
    out
}

fn remove_from(map: &mut HashMap<Address, HashSet<Address>>, key: &Address, value: &Address) {
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

/// Only a later frame of the same author's dynamic binding may take over an
/// address that is already held.
fn may_replace(existing: &Summary, arriving: &Summary) -> bool {
    match (existing, arriving) {
        (
            Summary::DynamicBinding { author: held, .. },
            Summary::DynamicBinding { author, .. },
        ) => held == author,
        _ => existing == arriving,
    }
}

impl LedgerState {
    /// Resolve staged debindings of `target` against its summary: the
    /// arriving one if given, else the catalog entry.
    fn revalidate(&mut self, target: &Address, arriving: Option<&Summary>) {
        let Some(target_summary) = arriving.cloned().or_else(|| self.catalog.get(target).cloned())
        else {
            return;
        };
        let Some(staged) = self.staged.remove(target) else {
            return;
        };
        for debinding in staged {
            let Some(author) = self.catalog.get(&debinding).and_then(Summary::author) else {
                continue;
            };
            match rules::check_debinding(author, &target_summary) {
                Ok(()) => {
                    debug!(target = %target, debinding = %debinding, "staged debinding promoted");
                    self.debound_by.entry(*target).or_default().insert(debinding);
                }
                Err(rejection) => {
                    debug!(
                        target = %target,
                        debinding = %debinding,
                        reason = %rejection,
                        "staged debinding demoted"
                    );
                    self.illegal.insert(debinding);
                    self.newly_illegal.push(debinding);
                }
            }
        }
    }

    fn record_binding(&mut self, target: Address, binding: Address) {
        self.bound_by.entry(target).or_default().insert(binding);
    }

    fn record_debinding(&mut self, target: Address, debinding: Address) {
        if self.catalog.contains_key(&target) {
            self.debound_by.entry(target).or_default().insert(debinding);
        } else {
            self.staged.entry(target).or_default().insert(debinding);
        }
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// Whether `address` is a live primitive or a current dynamic frame.
    pub fn contains(&self, address: &Address) -> bool {
        let state = self.read();
        state.catalog.contains_key(address) || state.frame_owners.contains_key(address)
    }

    /// Summary by primary address, or by current frame address.
    pub fn summary(&self, address: &Address) -> Option<Summary> {
        let state = self.read();
        let primary = state.frame_owners.get(address).unwrap_or(address);
        state.catalog.get(primary).cloned()
    }

    /// Whether this exact primitive is already held. For dynamic bindings
    /// this compares frames, so a new frame is not yet known.
    pub fn knows(&self, summary: &Summary) -> bool {
        let state = self.read();
        match state.catalog.get(&summary.address()) {
            Some(existing) => existing.storage_address() == summary.storage_address(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read().catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live primary address, sorted.
    pub fn addresses(&self) -> Vec<Address> {
        let state = self.read();
        let mut out: Vec<Address> = state.catalog.keys().copied().collect();
        out.sort();
        out
    }

    /// Record a verified primitive and update every index it touches.
    ///
    /// Returns the summary it replaced, which is only ever a previous frame
    /// of the same dynamic binding. An address already held by a different
    /// primitive is refused and nothing changes.
    pub fn place(&self, summary: Summary) -> LedgerResult<Option<Summary>> {
        let mut state = self.write();
        let address = summary.address();
        if let Some(existing) = state.catalog.get(&address) {
            if !may_replace(existing, &summary) {
                return Err(LedgerError::AddressTaken {
                    address,
                    held_by: existing.kind(),
                });
            }
        }
        let previous = state.catalog.insert(address, summary.clone());

        match &summary {
            Summary::StaticBinding { target, .. } => state.record_binding(*target, address),
            Summary::DynamicBinding { frame, target, .. } => {
                if let Some(Summary::DynamicBinding {
                    frame: old_frame,
                    target: old_target,
                    ..
                }) = &previous
                {
                    state.frame_owners.remove(old_frame);
                    if old_target != target {
                        remove_from(&mut state.bound_by, old_target, &address);
                    }
                }
                state.frame_owners.insert(*frame, address);
                state.record_binding(*target, address);
            }
            Summary::Debinding { target, .. } => state.record_debinding(*target, address),
            Summary::Request { recipient, .. } => {
                state.requests_for.entry(*recipient).or_default().insert(address);
            }
            Summary::Identity { .. } | Summary::Container { .. } => {}
        }

        Ok(previous.filter(|old| old.storage_address() != summary.storage_address()))
    }

    /// Purge a primitive from every index. Identities are never collected.
    ///
    /// Debindings that target the removed primitive stay recorded, so a
    /// replay of the removed primitive is still refused.
    pub fn force_gc(&self, address: &Address) -> LedgerResult<Summary> {
        let mut state = self.write();
        let summary = state
            .catalog
            .get(address)
            .cloned()
            .ok_or(LedgerError::NotFound(*address))?;
        if matches!(summary, Summary::Identity { .. }) {
            return Err(LedgerError::Uncollectable(*address));
        }
        state.catalog.remove(address);

        match &summary {
            Summary::StaticBinding { target, .. } => {
                remove_from(&mut state.bound_by, target, address);
            }
            Summary::DynamicBinding { frame, target, .. } => {
                state.frame_owners.remove(frame);
                remove_from(&mut state.bound_by, target, address);
            }
            Summary::Debinding { target, .. } => {
                remove_from(&mut state.debound_by, target, address);
                remove_from(&mut state.staged, target, address);
                state.illegal.remove(address);
            }
            Summary::Request { recipient, .. } => {
                remove_from(&mut state.requests_for, recipient, address);
            }
            Summary::Identity { .. } | Summary::Container { .. } => {}
        }
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Bindings
    // -----------------------------------------------------------------------

    pub fn record_binding(&self, target: Address, binding: Address) {
        self.write().record_binding(target, binding);
    }

    pub fn remove_binding(&self, target: &Address, binding: &Address) {
        remove_from(&mut self.write().bound_by, target, binding);
    }

    pub fn is_bound(&self, target: &Address) -> bool {
        self.read()
            .bound_by
            .get(target)
            .is_some_and(|set| !set.is_empty())
    }

    pub fn bindings_of(&self, target: &Address) -> Vec<Address> {
        sorted(self.read().bound_by.get(target))
    }

    // -----------------------------------------------------------------------
    // Debindings
    // -----------------------------------------------------------------------

    /// Validated if `target` is known, staged until it arrives otherwise.
    pub fn record_debinding(&self, target: Address, debinding: Address) {
        self.write().record_debinding(target, debinding);
    }

    /// Whether `target` carries a validated debinding. Staged debindings of
    /// a target that has since arrived are revalidated first.
    pub fn is_debound(&self, target: &Address) -> bool {
        let mut state = self.write();
        state.revalidate(target, None);
        state
            .debound_by
            .get(target)
            .is_some_and(|set| !set.is_empty())
    }

    /// Validated debindings of `target`, after revalidation.
    pub fn debindings_of(&self, target: &Address) -> Vec<Address> {
        let mut state = self.write();
        state.revalidate(target, None);
        sorted(state.debound_by.get(target))
    }

    /// Whether a primitive not yet placed is already debound. Staged
    /// debindings are resolved against `arriving` itself.
    pub fn is_debound_on_arrival(&self, arriving: &Summary) -> bool {
        let target = arriving.address();
        let mut state = self.write();
        state.revalidate(&target, Some(arriving));
        state
            .debound_by
            .get(&target)
            .is_some_and(|set| !set.is_empty())
    }

    /// Debindings still waiting for their target.
    pub fn staged_debindings_of(&self, target: &Address) -> Vec<Address> {
        sorted(self.read().staged.get(target))
    }

    /// Whether a debinding failed revalidation against its target.
    pub fn is_illegal(&self, debinding: &Address) -> bool {
        self.read().illegal.contains(debinding)
    }

    /// Drain debindings demoted since the last call.
    pub fn take_illegal(&self) -> Vec<Address> {
        std::mem::take(&mut self.write().newly_illegal)
    }

    // -----------------------------------------------------------------------
    // Frames and requests
    // -----------------------------------------------------------------------

    pub fn resolve_current_frame(&self, dynamic: &Address) -> Option<Address> {
        match self.read().catalog.get(dynamic) {
            Some(Summary::DynamicBinding { frame, .. }) => Some(*frame),
            _ => None,
        }
    }

    pub fn recipient_requests(&self, recipient: &Address) -> Vec<Address> {
        sorted(self.read().requests_for.get(recipient))
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Ledger")
            .field("live", &state.catalog.len())
            .field("staged_targets", &state.staged.len())
            .field("illegal", &state.illegal.len())
            .finish()
    }
}
