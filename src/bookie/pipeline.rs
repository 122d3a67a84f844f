//! Journal pipeline: the single consumer of accepted writes
//!
//! Flow per batch:
//! 1. Drain up to `max_batch` ops from the bounded queue
//! 2. Append each op to the journal, then write adds to their ledger directory
//! 3. Acknowledge `ack_before_sync` adds as soon as their storage write lands
//! 4. Flush (and fsync) the journal once. When the journal holds no payloads,
//!    also sync every ledger directory the waiting adds were written to
//! 5. Record new or newly fenced ledgers in the index, then complete
//!    everything else
//!
//! Ops arrive in admission order and are processed in that order, so a fence
//! marker completes only after every add queued before it. A ledger's first
//! op is preceded by a ledger record carrying its master key.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::callback::{CallbackDispatcher, Completion, StatusCode};
use crate::entry::Entry;
use crate::journal::{self, Journal, JournalRecord};
use crate::ledger::{DirId, FenceController, LedgerDirsManager, LedgerState};
use crate::observability::Metrics;

pub(crate) struct AddRequest {
    pub entry: Entry,
    pub ledger: Arc<LedgerState>,
    /// Allocated at admission; replaced by the directory actually written
    pub dir: DirId,
    pub ack_before_sync: bool,
    pub completion: Completion,
}

pub(crate) enum JournalOp {
    Add(AddRequest),
    Fence {
        ledger: Arc<LedgerState>,
        done: oneshot::Sender<bool>,
    },
}

impl JournalOp {
    /// Give up on an op that never reached the pipeline without firing its
    /// callback
    pub(crate) fn abandon(self) {
        match self {
            JournalOp::Add(request) => request.completion.disarm(),
            JournalOp::Fence { done, .. } => {
                let _ = done.send(false);
            }
        }
    }
}

enum AwaitingSync {
    Add(AddRequest),
    Fence(oneshot::Sender<bool>),
}

pub(crate) struct JournalWorker {
    dirs: Arc<LedgerDirsManager>,
    fences: Arc<FenceController>,
    dispatcher: Arc<CallbackDispatcher>,
    metrics: Arc<Metrics>,
    journal_write_data: bool,
}

impl JournalWorker {
    pub(crate) fn new(
        dirs: Arc<LedgerDirsManager>,
        fences: Arc<FenceController>,
        dispatcher: Arc<CallbackDispatcher>,
        metrics: Arc<Metrics>,
        journal_write_data: bool,
    ) -> Self {
        Self {
            dirs,
            fences,
            dispatcher,
            metrics,
            journal_write_data,
        }
    }

    /// Run until every sender is dropped and the queue is drained
    pub(crate) fn spawn(
        self,
        journal: Journal,
        rx: mpsc::Receiver<JournalOp>,
        max_batch: usize,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self).run(journal, rx, max_batch))
    }

    async fn run(
        self: Arc<Self>,
        mut journal: Journal,
        mut rx: mpsc::Receiver<JournalOp>,
        max_batch: usize,
    ) {
        info!(max_batch, "Journal pipeline started");
        let mut batch = Vec::with_capacity(max_batch);

        loop {
            if rx.recv_many(&mut batch, max_batch).await == 0 {
                break;
            }
            let ops = std::mem::replace(&mut batch, Vec::with_capacity(max_batch));
            let worker = self.clone();

            let outcome = tokio::task::spawn_blocking(move || {
                worker.process_batch(&mut journal, ops);
                journal
            })
            .await;

            match outcome {
                Ok(returned) => journal = returned,
                Err(e) => {
                    // Completions owned by the lost batch fire on drop
                    error!(error = %e, "Journal batch task failed, stopping pipeline");
                    rx.close();
                    while let Some(op) = rx.recv().await {
                        drop(op);
                    }
                    return;
                }
            }
        }

        info!(journal_len = journal.len(), "Journal pipeline stopped");
    }

    fn process_batch(&self, journal: &mut Journal, ops: Vec<JournalOp>) {
        let mut awaiting = Vec::with_capacity(ops.len());
        let mut touched: Vec<Arc<LedgerState>> = Vec::new();

        for op in ops {
            match op {
                JournalOp::Add(request) => {
                    self.process_add(journal, request, &mut awaiting, &mut touched)
                }
                JournalOp::Fence { ledger, done } => {
                    let ledger_id = ledger.ledger_id();
                    let appended = self
                        .journal_ledger(journal, &ledger, &mut touched)
                        .and_then(|()| journal.append(&JournalRecord::fence(ledger_id)));
                    match appended {
                        Ok(_) => {
                            touched.push(ledger);
                            awaiting.push(AwaitingSync::Fence(done));
                        }
                        Err(e) => {
                            error!(ledger_id, error = %e, "Failed to journal fence");
                            self.dispatcher.notify(done, false);
                        }
                    }
                }
            }
        }

        let synced = journal.flush();
        self.metrics.journal_batch();

        if let Err(e) = synced {
            error!(error = %e, pending = awaiting.len(), "Journal sync failed");
            for pending in awaiting {
                match pending {
                    AwaitingSync::Add(request) => self.fail(request, StatusCode::WriteError),
                    AwaitingSync::Fence(done) => self.dispatcher.notify(done, false),
                }
            }
            return;
        }

        let awaiting = if self.journal_write_data {
            awaiting
        } else {
            self.sync_stores(awaiting)
        };

        for ledger in touched {
            if let Err(e) = self.fences.record_ledger(&ledger) {
                warn!(ledger_id = ledger.ledger_id(), error = %e, "Failed to update ledger index");
            }
        }

        for pending in awaiting {
            match pending {
                AwaitingSync::Add(request) => self.acknowledge(request),
                AwaitingSync::Fence(done) => self.dispatcher.notify(done, true),
            }
        }
    }

    /// Journal the ledger record ahead of the ledger's first op
    fn journal_ledger(
        &self,
        journal: &mut Journal,
        ledger: &Arc<LedgerState>,
        touched: &mut Vec<Arc<LedgerState>>,
    ) -> journal::Result<()> {
        if ledger.is_journaled() {
            return Ok(());
        }
        let record =
            JournalRecord::ledger(ledger.ledger_id(), Bytes::copy_from_slice(ledger.master_key()));
        journal.append(&record)?;
        ledger.mark_journaled();
        touched.push(ledger.clone());
        debug!(ledger_id = ledger.ledger_id(), "Ledger journaled");
        Ok(())
    }

    fn process_add(
        &self,
        journal: &mut Journal,
        mut request: AddRequest,
        awaiting: &mut Vec<AwaitingSync>,
        touched: &mut Vec<Arc<LedgerState>>,
    ) {
        let entry = &request.entry;
        let payload = self.journal_write_data.then(|| entry.payload.clone());
        let record = JournalRecord::add_entry(entry.ledger_id, entry.entry_id, payload);

        let appended = self
            .journal_ledger(journal, &request.ledger, touched)
            .and_then(|()| journal.append(&record));
        if let Err(e) = appended {
            error!(
                ledger_id = entry.ledger_id,
                entry_id = entry.entry_id,
                error = %e,
                "Failed to journal entry"
            );
            self.fail(request, StatusCode::WriteError);
            return;
        }

        match self.write_to_storage(&request) {
            Ok(dir) => request.dir = dir,
            Err(status) => {
                self.fail(request, status);
                return;
            }
        }

        if request.ack_before_sync {
            self.acknowledge(request);
        } else {
            awaiting.push(AwaitingSync::Add(request));
        }
    }

    /// Write into the allocated directory, failing over to the next best one
    /// when a directory errors. Every failed directory is marked unwritable,
    /// so this ends once the writable set is exhausted.
    fn write_to_storage(&self, request: &AddRequest) -> Result<DirId, StatusCode> {
        let entry = &request.entry;
        let mut dir = request.dir;

        for _ in 0..=self.dirs.len() {
            if self.dirs.is_writable(dir) {
                let store = self.dirs.store(dir);
                match store.put_entry(entry.ledger_id, entry.entry_id, &entry.payload) {
                    Ok(()) => return Ok(dir),
                    Err(e) => {
                        warn!(
                            dir = %store.path().display(),
                            ledger_id = entry.ledger_id,
                            entry_id = entry.entry_id,
                            error = %e,
                            "Ledger directory write failed"
                        );
                        self.disable_dir(dir);
                    }
                }
            }

            dir = match self.dirs.allocate() {
                Ok(next) => next,
                Err(e) => {
                    error!(
                        ledger_id = entry.ledger_id,
                        entry_id = entry.entry_id,
                        error = %e,
                        "No ledger directory left for accepted entry"
                    );
                    return Err(StatusCode::WriteOnReadOnlyBookie);
                }
            };
        }

        Err(StatusCode::WriteOnReadOnlyBookie)
    }

    /// Sync each directory holding a waiting add; the journal has only ids.
    /// Adds whose directory fails to sync are failed here and dropped from
    /// the returned list.
    fn sync_stores(&self, awaiting: Vec<AwaitingSync>) -> Vec<AwaitingSync> {
        let dirs: BTreeSet<DirId> = awaiting
            .iter()
            .filter_map(|pending| match pending {
                AwaitingSync::Add(request) => Some(request.dir),
                AwaitingSync::Fence(_) => None,
            })
            .collect();

        let mut failed = BTreeSet::new();
        for dir in dirs {
            let store = self.dirs.store(dir);
            if let Err(e) = store.persist() {
                error!(dir = %store.path().display(), error = %e, "Ledger directory sync failed");
                self.disable_dir(dir);
                failed.insert(dir);
            }
        }
        if failed.is_empty() {
            return awaiting;
        }

        let mut synced = Vec::with_capacity(awaiting.len());
        for pending in awaiting {
            match pending {
                AwaitingSync::Add(request) if failed.contains(&request.dir) => {
                    self.fail(request, StatusCode::WriteError)
                }
                other => synced.push(other),
            }
        }
        synced
    }

    fn disable_dir(&self, dir: DirId) {
        if self.dirs.mark_unwritable(dir) {
            self.metrics.dir_failed();
        }
    }

    fn acknowledge(&self, request: AddRequest) {
        let AddRequest {
            entry,
            ledger,
            completion,
            ..
        } = request;

        let lac = ledger.advance_last_add_confirmed(entry.entry_id);
        self.metrics.entry_added();
        debug!(
            ledger_id = entry.ledger_id,
            entry_id = entry.entry_id,
            last_add_confirmed = lac,
            "Entry added"
        );
        completion.complete(StatusCode::Ok);
    }

    fn fail(&self, request: AddRequest, status: StatusCode) {
        self.metrics.add_failed();
        request.completion.complete(status);
    }
}
