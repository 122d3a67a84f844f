#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bookie::bookie::{Bookie, BookieId, StatusCode, WriteCallback, WriteContext};
use bookie::config::BookieConfig;
use bookie::ledger::{EntryStore, LedgerDirsManager, LedgerError, LedgerStore, SpaceProbe};
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// What a write callback was invoked with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub status: StatusCode,
    pub ledger_id: i64,
    pub entry_id: i64,
    pub bookie: String,
    pub ctx: Option<String>,
}

/// Callback forwarding every invocation into a channel the test awaits
pub fn recording_callback() -> (Arc<dyn WriteCallback>, mpsc::UnboundedReceiver<Recorded>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |status: StatusCode,
                         ledger_id: i64,
                         entry_id: i64,
                         bookie: &BookieId,
                         ctx: WriteContext| {
        let ctx = ctx.downcast::<String>().ok().map(|ctx| *ctx);
        let _ = tx.send(Recorded {
            status,
            ledger_id,
            entry_id,
            bookie: bookie.to_string(),
            ctx,
        });
    };
    (Arc::new(callback), rx)
}

pub async fn expect_completion(rx: &mut mpsc::UnboundedReceiver<Recorded>) -> Recorded {
    timeout(CALLBACK_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for write callback")
        .expect("callback channel closed")
}

/// Assert the callback stays silent for a while
pub async fn expect_no_completion(rx: &mut mpsc::UnboundedReceiver<Recorded>) {
    let outcome = timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(
        !matches!(outcome, Ok(Some(_))),
        "unexpected callback: {outcome:?}"
    );
}

pub fn test_config(temp: &TempDir, ledger_dirs: usize) -> BookieConfig {
    BookieConfig {
        bookie_id: "bookie-test:3181".to_string(),
        ..BookieConfig::with_data_dir(temp.path(), ledger_dirs)
    }
}

pub async fn start_bookie(config: &BookieConfig) -> Bookie {
    Bookie::start(config).await.expect("bookie failed to start")
}

pub fn ctx(value: &str) -> WriteContext {
    Box::new(value.to_string())
}

/// Switches and counters shared between a test and its [`FlakyStore`]
#[derive(Debug, Default)]
pub struct Faults {
    pub fail_puts: AtomicBool,
    pub fail_persist: AtomicBool,
    pub put_attempts: AtomicUsize,
    pub persists: AtomicUsize,
}

impl Faults {
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }
}

fn injected(op: &str) -> LedgerError {
    LedgerError::Io(std::io::Error::other(format!("injected {op} failure")))
}

/// Real store whose writes and syncs can be made to fail
pub struct FlakyStore {
    inner: LedgerStore,
    faults: Arc<Faults>,
}

impl EntryStore for FlakyStore {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn put_entry(&self, ledger_id: i64, entry_id: i64, payload: &[u8]) -> Result<(), LedgerError> {
        self.faults.put_attempts.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_puts.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        self.inner.put_entry(ledger_id, entry_id, payload)
    }

    fn get_entry(&self, ledger_id: i64, entry_id: i64) -> Result<Option<Bytes>, LedgerError> {
        self.inner.get_entry(ledger_id, entry_id)
    }

    fn contains_entry(&self, ledger_id: i64, entry_id: i64) -> Result<bool, LedgerError> {
        self.inner.contains_entry(ledger_id, entry_id)
    }

    fn last_entry_id(&self, ledger_id: i64) -> Result<Option<i64>, LedgerError> {
        self.inner.last_entry_id(ledger_id)
    }

    fn persist(&self) -> Result<(), LedgerError> {
        if self.faults.fail_persist.load(Ordering::SeqCst) {
            return Err(injected("persist"));
        }
        self.inner.persist()?;
        self.faults.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Every directory reports the same free space, so allocation ties go to
/// the first writable one
pub struct SameSpace;

impl SpaceProbe for SameSpace {
    fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(1 << 40)
    }
}

/// Open one flaky store per configured ledger directory
pub fn flaky_dirs(config: &BookieConfig) -> (LedgerDirsManager, Vec<Arc<Faults>>) {
    let mut faults = Vec::new();
    let mut stores: Vec<Box<dyn EntryStore>> = Vec::new();
    for path in &config.ledger_dirs {
        let switches = Arc::new(Faults::default());
        stores.push(Box::new(FlakyStore {
            inner: LedgerStore::open(path).expect("failed to open ledger store"),
            faults: switches.clone(),
        }));
        faults.push(switches);
    }
    (
        LedgerDirsManager::from_stores(stores, 0, Arc::new(SameSpace)),
        faults,
    )
}
