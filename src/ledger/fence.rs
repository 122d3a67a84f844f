//! Per-ledger write state: master key, fencing and last-add-confirmed
//!
//! Ledgers live in a map keyed by id; each [`LedgerState`] guards itself with
//! atomics so writers on different ledgers never contend on more than the
//! map's read lock. Fencing is sticky: nothing in this module clears it.
//! Only [`FenceController::persist`] syncs anything to disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info};

use super::error::Result;
use super::index::{LedgerIndex, LedgerMeta};
use crate::entry::INVALID_ENTRY_ID;

#[derive(Debug, Error)]
pub enum FenceError {
    #[error("ledger {0} is fenced")]
    Fenced(i64),

    #[error("master key mismatch for ledger {0}")]
    UnauthorizedKey(i64),
}

#[derive(Debug)]
pub struct LedgerState {
    ledger_id: i64,
    master_key: Vec<u8>,
    fenced: AtomicBool,
    last_add_confirmed: AtomicI64,
    /// Set once the journal holds a ledger record carrying the master key
    journaled: AtomicBool,
    /// Shared by writers while they enqueue, exclusive while fencing, so a
    /// fence marker is always queued behind every write admitted before it
    admission: RwLock<()>,
}

impl LedgerState {
    fn new(
        ledger_id: i64,
        master_key: Vec<u8>,
        fenced: bool,
        last_add_confirmed: i64,
        journaled: bool,
    ) -> Self {
        Self {
            ledger_id,
            master_key,
            fenced: AtomicBool::new(fenced),
            last_add_confirmed: AtomicI64::new(last_add_confirmed),
            journaled: AtomicBool::new(journaled),
            admission: RwLock::new(()),
        }
    }

    pub fn ledger_id(&self) -> i64 {
        self.ledger_id
    }

    pub fn master_key(&self) -> &[u8] {
        &self.master_key
    }

    pub fn is_fenced(&self) -> bool {
        self.fenced.load(Ordering::Acquire)
    }

    pub fn last_add_confirmed(&self) -> i64 {
        self.last_add_confirmed.load(Ordering::Acquire)
    }

    /// Raise last-add-confirmed to `entry_id` unless it is already higher.
    /// Returns the value after the update.
    pub fn advance_last_add_confirmed(&self, entry_id: i64) -> i64 {
        let previous = self.last_add_confirmed.fetch_max(entry_id, Ordering::AcqRel);
        previous.max(entry_id)
    }

    pub(crate) fn is_journaled(&self) -> bool {
        self.journaled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_journaled(&self) {
        self.journaled.store(true, Ordering::Release);
    }

    pub(crate) fn admit(&self) -> RwLockReadGuard<'_, ()> {
        self.admission.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.admission.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_matches(&self, master_key: &[u8], all_writers_key: Option<&[u8]>) -> bool {
        self.master_key == master_key || all_writers_key.is_some_and(|key| key == master_key)
    }

    fn meta(&self) -> LedgerMeta {
        LedgerMeta {
            master_key: self.master_key.clone(),
            fenced: self.is_fenced(),
        }
    }
}

/// In-memory ledger registry backed by the [`LedgerIndex`].
///
/// Creating a ledger touches memory only. The journal pipeline records the
/// ledger in the journal and then in the index via
/// [`FenceController::record_ledger`]; the index itself is synced at startup
/// and shutdown, with the journal covering everything in between.
pub struct FenceController {
    ledgers: RwLock<HashMap<i64, Arc<LedgerState>>>,
    index: LedgerIndex,
    all_writers_key: Option<Vec<u8>>,
}

impl FenceController {
    pub fn new(index: LedgerIndex, all_writers_key: Option<Vec<u8>>) -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
            index,
            all_writers_key,
        }
    }

    /// Rebuild in-memory state from the persisted index. `last_entry` reports
    /// the highest stored entry id of a ledger, which becomes its
    /// last-add-confirmed.
    pub fn restore<F>(
        index: LedgerIndex,
        all_writers_key: Option<Vec<u8>>,
        mut last_entry: F,
    ) -> Result<Self>
    where
        F: FnMut(i64) -> Result<Option<i64>>,
    {
        let mut ledgers = HashMap::new();
        for (ledger_id, meta) in index.load_all()? {
            let lac = last_entry(ledger_id)?.unwrap_or(INVALID_ENTRY_ID);
            ledgers.insert(
                ledger_id,
                Arc::new(LedgerState::new(
                    ledger_id,
                    meta.master_key,
                    meta.fenced,
                    lac,
                    true,
                )),
            );
        }
        info!(ledgers = ledgers.len(), "Restored ledger state");

        Ok(Self {
            ledgers: RwLock::new(ledgers),
            index,
            all_writers_key,
        })
    }

    pub fn get(&self, ledger_id: i64) -> Option<Arc<LedgerState>> {
        let ledgers = self.ledgers.read().unwrap_or_else(PoisonError::into_inner);
        ledgers.get(&ledger_id).cloned()
    }

    pub fn ledger_count(&self) -> usize {
        self.ledgers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn authorized(
        &self,
        state: Arc<LedgerState>,
        master_key: &[u8],
    ) -> std::result::Result<Arc<LedgerState>, FenceError> {
        if !state.key_matches(master_key, self.all_writers_key.as_deref()) {
            return Err(FenceError::UnauthorizedKey(state.ledger_id));
        }
        Ok(state)
    }

    /// Gate a write against an existing ledger. Recovery writes ignore
    /// fencing; the key always has to match. `None` means the ledger is
    /// unseen: nothing is created here, so a write refused later leaves no
    /// trace.
    pub fn check_writable(
        &self,
        ledger_id: i64,
        master_key: &[u8],
        recovery: bool,
    ) -> std::result::Result<Option<Arc<LedgerState>>, FenceError> {
        let Some(state) = self.get(ledger_id) else {
            return Ok(None);
        };
        let state = self.authorized(state, master_key)?;
        if !recovery && state.is_fenced() {
            return Err(FenceError::Fenced(ledger_id));
        }
        Ok(Some(state))
    }

    /// Resolve a ledger for a caller presenting `master_key`, creating it in
    /// memory on first contact. Call only once the request is certain to
    /// reach the journal pipeline.
    pub fn open_ledger(
        &self,
        ledger_id: i64,
        master_key: &[u8],
    ) -> std::result::Result<Arc<LedgerState>, FenceError> {
        if let Some(state) = self.get(ledger_id) {
            return self.authorized(state, master_key);
        }

        let state = {
            let mut ledgers = self.ledgers.write().unwrap_or_else(PoisonError::into_inner);
            ledgers
                .entry(ledger_id)
                .or_insert_with(|| {
                    debug!(ledger_id, "Ledger created");
                    Arc::new(LedgerState::new(
                        ledger_id,
                        master_key.to_vec(),
                        false,
                        INVALID_ENTRY_ID,
                        false,
                    ))
                })
                .clone()
        };
        self.authorized(state, master_key)
    }

    /// Raise the fence flag of an already authorized ledger. Returns whether
    /// this call was the one that fenced it.
    pub fn mark_fenced(&self, state: &LedgerState) -> bool {
        let newly_fenced = !state.fenced.swap(true, Ordering::AcqRel);
        if newly_fenced {
            info!(ledger_id = state.ledger_id, "Ledger fenced");
        }
        newly_fenced
    }

    /// Write a ledger's current key and fence flag to the index
    pub fn record_ledger(&self, state: &LedgerState) -> Result<()> {
        self.index.put(state.ledger_id, &state.meta())
    }

    /// Recreate a ledger from its journaled ledger record. Returns false when
    /// the ledger is already known.
    pub(crate) fn restore_ledger(&self, ledger_id: i64, master_key: &[u8]) -> Result<bool> {
        let state = {
            let mut ledgers = self.ledgers.write().unwrap_or_else(PoisonError::into_inner);
            if ledgers.contains_key(&ledger_id) {
                return Ok(false);
            }
            let state = Arc::new(LedgerState::new(
                ledger_id,
                master_key.to_vec(),
                false,
                INVALID_ENTRY_ID,
                true,
            ));
            ledgers.insert(ledger_id, state.clone());
            state
        };
        self.record_ledger(&state)?;
        Ok(true)
    }

    /// Re-apply a fence found during journal replay. Returns false when the
    /// ledger is unknown.
    pub(crate) fn fence_replayed(&self, ledger_id: i64) -> Result<bool> {
        match self.get(ledger_id) {
            Some(state) => {
                if self.mark_fenced(&state) {
                    self.record_ledger(&state)?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn persist(&self) -> Result<()> {
        self.index.persist()
    }
}
