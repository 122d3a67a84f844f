//! The entry engine of a single bookie
//!
//! Architecture:
//! 1. Callers hand `add_entry` an encoded entry, a master key and a callback
//! 2. Decode, key and fence checks, directory allocation and a queue slot
//!    reservation run on the caller's thread without touching disk; any
//!    refusal there is returned synchronously and leaves no trace
//! 3. Only then is an unseen ledger created, and the write goes onto the
//!    bounded queue drained by the journal pipeline
//! 4. The pipeline journals, stores and completes each write via its callback
//!
//! Reads go straight to the ledger stores and never touch the queue.

mod callback;
mod error;
mod pipeline;
mod recovery;

pub use callback::{BookieId, CallbackDispatcher, StatusCode, WriteCallback, WriteContext};
pub use error::{BookieError, RejectReason, Result};

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BookieConfig;
use crate::entry::{self, CodecError, Entry};
use crate::journal::Journal;
use crate::ledger::{
    DiskSpaceProbe, FenceController, LedgerDirsManager, LedgerIndex, LedgerState, SpaceProbe,
};
use crate::observability::{Metrics, MetricsSnapshot};
use callback::Completion;
use pipeline::{AddRequest, JournalOp, JournalWorker};

/// Subdirectory of the journal directory holding ledger metadata
const INDEX_DIR: &str = "index";

/// Resolves once every write admitted before the fence has completed
#[derive(Debug)]
pub struct FenceHandle {
    ledger_id: i64,
    rx: oneshot::Receiver<bool>,
}

impl FenceHandle {
    pub fn ledger_id(&self) -> i64 {
        self.ledger_id
    }

    /// True once the fence marker is durable in the journal
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookieStats {
    pub bookie_id: String,
    pub accepting_writes: bool,
    pub ledgers: usize,
    pub ledger_dirs: usize,
    pub writable_dirs: usize,
    pub metrics: MetricsSnapshot,
}

pub struct Bookie {
    dispatcher: Arc<CallbackDispatcher>,
    dirs: Arc<LedgerDirsManager>,
    fences: Arc<FenceController>,
    metrics: Arc<Metrics>,
    queue: RwLock<Option<mpsc::Sender<JournalOp>>>,
    journal_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl Bookie {
    /// Open storage, replay the journal and start the journal pipeline
    pub async fn start(config: &BookieConfig) -> Result<Self> {
        Self::start_with_probe(config, Arc::new(DiskSpaceProbe)).await
    }

    pub async fn start_with_probe(
        config: &BookieConfig,
        probe: Arc<dyn SpaceProbe>,
    ) -> Result<Self> {
        let dirs = LedgerDirsManager::open(
            &config.ledger_dirs,
            config.min_free_space.as_u64(),
            probe,
        )?;
        Self::start_with_dirs(config, dirs).await
    }

    /// Start on ledger directories opened by the caller. `config.ledger_dirs`
    /// and `config.min_free_space` are not consulted.
    pub async fn start_with_dirs(config: &BookieConfig, dirs: LedgerDirsManager) -> Result<Self> {
        info!(
            bookie_id = %config.bookie_id,
            journal_dir = %config.journal_dir.display(),
            ledger_dirs = dirs.len(),
            "Starting bookie"
        );

        let metrics = Arc::new(Metrics::new());
        let dirs = Arc::new(dirs);

        let index = LedgerIndex::open(config.journal_dir.join(INDEX_DIR))?;
        let all_writers_key = config.all_writers_key.clone().map(String::into_bytes);
        let fences = Arc::new(FenceController::restore(index, all_writers_key, |ledger_id| {
            recovery::last_stored_entry(&dirs, ledger_id)
        })?);

        let (replayed, stats) = recovery::apply_journal(&config.journal_dir, &dirs, &fences)?;
        if stats.changed_state() {
            for store in dirs.stores() {
                store.persist()?;
            }
            fences.persist()?;
        }

        let journal = Journal::open(
            &config.journal_dir,
            replayed.valid_len,
            config.journal_sync_data,
        )?;

        let dispatcher = Arc::new(CallbackDispatcher::new(
            BookieId::new(config.bookie_id.clone()),
            metrics.clone(),
        )?);

        let (tx, rx) = mpsc::channel(config.journal_queue_size);
        let task = JournalWorker::new(
            dirs.clone(),
            fences.clone(),
            dispatcher.clone(),
            metrics.clone(),
            config.journal_write_data,
        )
        .spawn(journal, rx, config.journal_max_batch);

        info!(ledgers = fences.ledger_count(), "Bookie started");
        Ok(Self {
            dispatcher,
            dirs,
            fences,
            metrics,
            queue: RwLock::new(Some(tx)),
            journal_task: Mutex::new(Some(task)),
            runtime: Handle::current(),
        })
    }

    pub fn bookie_id(&self) -> &BookieId {
        self.dispatcher.bookie_id()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn ledger_dirs(&self) -> &LedgerDirsManager {
        &self.dirs
    }

    pub fn is_accepting(&self) -> bool {
        self.queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Submit an entry for durable append.
    ///
    /// `Err` means the write was refused and `callback` will never run.
    /// `Ok` means it was accepted and `callback` runs exactly once with the
    /// outcome. With `ack_before_sync` the callback may fire before the
    /// journal is synced.
    pub fn add_entry(
        &self,
        entry: &Bytes,
        ack_before_sync: bool,
        callback: Arc<dyn WriteCallback>,
        ctx: WriteContext,
        master_key: &[u8],
    ) -> Result<()> {
        self.submit_add(entry, ack_before_sync, false, callback, ctx, master_key)
    }

    /// Add on behalf of ledger recovery: allowed on fenced ledgers and always
    /// acknowledged only after the journal sync.
    pub fn recovery_add_entry(
        &self,
        entry: &Bytes,
        callback: Arc<dyn WriteCallback>,
        ctx: WriteContext,
        master_key: &[u8],
    ) -> Result<()> {
        self.submit_add(entry, false, true, callback, ctx, master_key)
    }

    fn submit_add(
        &self,
        entry: &Bytes,
        ack_before_sync: bool,
        recovery: bool,
        callback: Arc<dyn WriteCallback>,
        ctx: WriteContext,
        master_key: &[u8],
    ) -> Result<()> {
        let result = self.admit_add(entry, ack_before_sync, recovery, callback, ctx, master_key);
        if let Err(e) = &result {
            if e.is_rejection() {
                self.metrics.add_rejected();
            } else {
                self.metrics.add_failed();
            }
            debug!(recovery, error = %e, "Add refused");
        }
        result
    }

    fn admit_add(
        &self,
        buf: &Bytes,
        ack_before_sync: bool,
        recovery: bool,
        callback: Arc<dyn WriteCallback>,
        ctx: WriteContext,
        master_key: &[u8],
    ) -> Result<()> {
        if !self.is_accepting() {
            return Err(BookieError::Rejected(RejectReason::ShuttingDown));
        }

        let entry = entry::decode(buf)?;
        let known = self
            .fences
            .check_writable(entry.ledger_id, master_key, recovery)?;
        let dir = self.dirs.allocate()?;

        let queue = self.queue.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            return Err(BookieError::Rejected(RejectReason::ShuttingDown));
        };
        let permit = tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => BookieError::Rejected(RejectReason::QueueFull),
            TrySendError::Closed(()) => BookieError::Rejected(RejectReason::ShuttingDown),
        })?;

        // The slot is held, so from here the write reaches the pipeline
        let ledger = match known {
            Some(ledger) => ledger,
            None => self.fences.open_ledger(entry.ledger_id, master_key)?,
        };

        // Checked again under the admission lock so no ordinary write can
        // slip in behind a concurrent fence marker.
        let _admission = ledger.admit();
        if !recovery && ledger.is_fenced() {
            return Err(BookieError::LedgerFenced(entry.ledger_id));
        }

        let completion = Completion::new(
            self.dispatcher.clone(),
            callback,
            ctx,
            entry.ledger_id,
            entry.entry_id,
        );
        permit.send(JournalOp::Add(AddRequest {
            entry,
            ledger: ledger.clone(),
            dir,
            ack_before_sync,
            completion,
        }));
        Ok(())
    }

    /// Fence a ledger against ordinary writes, creating it if unseen.
    ///
    /// The fence takes effect before this returns; the handle resolves after
    /// every write admitted earlier has completed and the fence is journaled.
    pub fn fence_ledger(&self, ledger_id: i64, master_key: &[u8]) -> Result<FenceHandle> {
        if ledger_id < 0 {
            return Err(CodecError::NegativeLedgerId(ledger_id).into());
        }

        let queue = self.queue.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            return Err(BookieError::Rejected(RejectReason::ShuttingDown));
        };

        let ledger = self.fences.open_ledger(ledger_id, master_key)?;
        let (done, rx) = oneshot::channel();
        {
            let _exclusive = ledger.exclusive();
            if self.fences.mark_fenced(&ledger) {
                self.metrics.ledger_fenced();
            }
            self.enqueue_fence(
                tx,
                JournalOp::Fence {
                    ledger: ledger.clone(),
                    done,
                },
            );
        }

        Ok(FenceHandle { ledger_id, rx })
    }

    /// Fences are never refused for a full queue; the marker waits for room
    /// on a runtime task instead.
    fn enqueue_fence(&self, tx: &mpsc::Sender<JournalOp>, op: JournalOp) {
        match tx.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(op)) => {
                let tx = tx.clone();
                self.runtime.spawn(async move {
                    if let Err(e) = tx.send(op).await {
                        e.0.abandon();
                    }
                });
            }
            Err(TrySendError::Closed(op)) => op.abandon(),
        }
    }

    /// Read back one stored entry
    pub fn read_entry(&self, ledger_id: i64, entry_id: i64) -> Result<Entry> {
        let result = self.lookup(ledger_id, entry_id);
        match &result {
            Ok(_) => self.metrics.entry_read(),
            Err(_) => self.metrics.read_missed(),
        }
        result
    }

    fn lookup(&self, ledger_id: i64, entry_id: i64) -> Result<Entry> {
        if self.fences.get(ledger_id).is_none() {
            return Err(BookieError::NoLedger(ledger_id));
        }
        if entry_id < 0 {
            return Err(BookieError::NoEntry {
                ledger_id,
                entry_id,
            });
        }

        for store in self.dirs.stores() {
            if let Some(payload) = store.get_entry(ledger_id, entry_id)? {
                return Ok(Entry::new(ledger_id, entry_id, payload));
            }
        }
        Err(BookieError::NoEntry {
            ledger_id,
            entry_id,
        })
    }

    pub fn read_last_add_confirmed(&self, ledger_id: i64) -> Result<i64> {
        self.ledger(ledger_id).map(|ledger| ledger.last_add_confirmed())
    }

    pub fn is_fenced(&self, ledger_id: i64) -> Result<bool> {
        self.ledger(ledger_id).map(|ledger| ledger.is_fenced())
    }

    fn ledger(&self, ledger_id: i64) -> Result<Arc<LedgerState>> {
        self.fences
            .get(ledger_id)
            .ok_or(BookieError::NoLedger(ledger_id))
    }

    pub fn stats(&self) -> BookieStats {
        BookieStats {
            bookie_id: self.bookie_id().to_string(),
            accepting_writes: self.is_accepting(),
            ledgers: self.fences.ledger_count(),
            ledger_dirs: self.dirs.len(),
            writable_dirs: self.dirs.writable_dirs().len(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Stop accepting writes, drain the pipeline and sync all storage.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let sender = self
            .queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return Ok(());
        }
        drop(sender);
        info!("Bookie shutting down, draining journal pipeline");

        let task = self
            .journal_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Journal pipeline ended abnormally");
            }
        }
        self.dispatcher.drain().await;

        for store in self.dirs.stores() {
            if let Err(e) = store.persist() {
                warn!(dir = %store.path().display(), error = %e, "Failed to sync ledger store");
            }
        }
        self.fences.persist()?;
        info!("Bookie stopped");
        Ok(())
    }
}
