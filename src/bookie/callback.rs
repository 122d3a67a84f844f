//! Write completion callbacks
//!
//! Once a write is accepted into the journal pipeline its outcome is reported
//! only through the caller's [`WriteCallback`], exactly once. A [`Completion`]
//! is consumed when it fires; if one is dropped unfired (pipeline torn down
//! under it) it reports [`StatusCode::BookieUnavailable`] instead of vanishing.
//!
//! Callbacks run on a dedicated `bookie-callbacks` thread in the order they
//! were fired, never on the journal pipeline, so a slow callback delays other
//! callbacks but not journaling or storage.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::observability::Metrics;

/// Result code handed to write callbacks. `0` is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusCode {
    Ok,
    NoSuchLedger,
    BookieUnavailable,
    WriteError,
    NoSuchEntry,
    LedgerFenced,
    UnauthorizedAccess,
    WriteOnReadOnlyBookie,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::NoSuchLedger => -7,
            StatusCode::BookieUnavailable => -8,
            StatusCode::WriteError => -12,
            StatusCode::NoSuchEntry => -13,
            StatusCode::LedgerFenced => -101,
            StatusCode::UnauthorizedAccess => -102,
            StatusCode::WriteOnReadOnlyBookie => -104,
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Identifier this node reports in every completion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BookieId(String);

impl BookieId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque caller value passed back untouched
pub type WriteContext = Box<dyn Any + Send>;

pub trait WriteCallback: Send + Sync {
    fn write_complete(
        &self,
        status: StatusCode,
        ledger_id: i64,
        entry_id: i64,
        bookie: &BookieId,
        ctx: WriteContext,
    );
}

impl<F> WriteCallback for F
where
    F: Fn(StatusCode, i64, i64, &BookieId, WriteContext) + Send + Sync,
{
    fn write_complete(
        &self,
        status: StatusCode,
        ledger_id: i64,
        entry_id: i64,
        bookie: &BookieId,
        ctx: WriteContext,
    ) {
        self(status, ledger_id, entry_id, bookie, ctx)
    }
}

enum Job {
    Callback {
        callback: Arc<dyn WriteCallback>,
        status: StatusCode,
        ledger_id: i64,
        entry_id: i64,
        ctx: WriteContext,
    },
    Notify {
        done: oneshot::Sender<bool>,
        ok: bool,
    },
    Barrier(oneshot::Sender<()>),
}

struct Runner {
    bookie_id: BookieId,
    metrics: Arc<Metrics>,
}

impl Runner {
    fn run(&self, job: Job) {
        match job {
            Job::Callback {
                callback,
                status,
                ledger_id,
                entry_id,
                ctx,
            } => {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    callback.write_complete(status, ledger_id, entry_id, &self.bookie_id, ctx)
                }));
                if outcome.is_err() {
                    self.metrics.callback_panicked();
                    error!(ledger_id, entry_id, %status, "Write callback panicked");
                }
            }
            Job::Notify { done, ok } => {
                let _ = done.send(ok);
            }
            Job::Barrier(reached) => {
                let _ = reached.send(());
            }
        }
    }
}

/// Runs callbacks on its own thread and contains their panics
pub struct CallbackDispatcher {
    runner: Arc<Runner>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl CallbackDispatcher {
    /// Start the callback thread. It exits once the dispatcher and every
    /// outstanding completion are gone.
    pub fn new(bookie_id: BookieId, metrics: Arc<Metrics>) -> std::io::Result<Self> {
        let runner = Arc::new(Runner { bookie_id, metrics });
        let (jobs, mut rx) = mpsc::unbounded_channel();

        let thread_runner = runner.clone();
        thread::Builder::new()
            .name("bookie-callbacks".to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    thread_runner.run(job);
                }
                debug!("Callback thread stopped");
            })?;

        Ok(Self { runner, jobs })
    }

    pub fn bookie_id(&self) -> &BookieId {
        &self.runner.bookie_id
    }

    fn submit(&self, job: Job) {
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            warn!("Callback thread gone, running callback inline");
            self.runner.run(job);
        }
    }

    fn dispatch(
        &self,
        callback: Arc<dyn WriteCallback>,
        status: StatusCode,
        ledger_id: i64,
        entry_id: i64,
        ctx: WriteContext,
    ) {
        self.submit(Job::Callback {
            callback,
            status,
            ledger_id,
            entry_id,
            ctx,
        });
    }

    /// Resolve `done` after every callback fired before this call has run
    pub(crate) fn notify(&self, done: oneshot::Sender<bool>, ok: bool) {
        self.submit(Job::Notify { done, ok });
    }

    /// Wait until every callback fired so far has returned
    pub async fn drain(&self) {
        let (reached, rx) = oneshot::channel();
        self.submit(Job::Barrier(reached));
        let _ = rx.await;
    }
}

/// One pending callback invocation
pub(crate) struct Completion {
    inner: Option<PendingCallback>,
    ledger_id: i64,
    entry_id: i64,
    dispatcher: Arc<CallbackDispatcher>,
}

struct PendingCallback {
    callback: Arc<dyn WriteCallback>,
    ctx: WriteContext,
}

impl Completion {
    pub(crate) fn new(
        dispatcher: Arc<CallbackDispatcher>,
        callback: Arc<dyn WriteCallback>,
        ctx: WriteContext,
        ledger_id: i64,
        entry_id: i64,
    ) -> Self {
        Self {
            inner: Some(PendingCallback { callback, ctx }),
            ledger_id,
            entry_id,
            dispatcher,
        }
    }

    pub(crate) fn complete(mut self, status: StatusCode) {
        self.fire(status);
    }

    /// Drop without invoking the callback. Used when the request is refused
    /// synchronously and never entered the pipeline.
    pub(crate) fn disarm(mut self) {
        self.inner = None;
    }

    fn fire(&mut self, status: StatusCode) {
        if let Some(PendingCallback { callback, ctx }) = self.inner.take() {
            self.dispatcher
                .dispatch(callback, status, self.ledger_id, self.entry_id, ctx);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(
                ledger_id = self.ledger_id,
                entry_id = self.entry_id,
                "Write abandoned by the pipeline"
            );
            self.fire(StatusCode::BookieUnavailable);
        }
    }
}
