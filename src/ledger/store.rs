use std::path::{Path, PathBuf};

use bytes::Bytes;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use super::error::{LedgerError, Result};
use super::partitions::{
    ENTRIES_PARTITION, decode_entry_key, encode_entry_key, encode_ledger_prefix,
};

/// Entry storage behind one ledger directory.
///
/// Entries are immutable once written; `put_entry` for an existing id with
/// the same bytes must succeed. Nothing is guaranteed durable until
/// [`EntryStore::persist`] returns.
pub trait EntryStore: Send + Sync {
    /// Directory the store lives in; used for free-space readings
    fn path(&self) -> &Path;

    fn put_entry(&self, ledger_id: i64, entry_id: i64, payload: &[u8]) -> Result<()>;

    fn get_entry(&self, ledger_id: i64, entry_id: i64) -> Result<Option<Bytes>>;

    fn contains_entry(&self, ledger_id: i64, entry_id: i64) -> Result<bool>;

    /// Highest non-negative entry id stored for the ledger
    fn last_entry_id(&self, ledger_id: i64) -> Result<Option<i64>>;

    fn persist(&self) -> Result<()>;
}

/// Fjall-backed entry storage living in one ledger directory
#[derive(Clone)]
pub struct LedgerStore {
    path: PathBuf,
    keyspace: Keyspace,
    entries: PartitionHandle,
}

impl LedgerStore {
    /// Open or create the store inside `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(dir = %path.display(), "Opening ledger store");

        std::fs::create_dir_all(path)?;
        let keyspace = Config::new(path.join("entries")).open()?;
        let entries = keyspace.open_partition(ENTRIES_PARTITION, PartitionCreateOptions::default())?;

        Ok(Self {
            path: path.to_path_buf(),
            keyspace,
            entries,
        })
    }
}

impl EntryStore for LedgerStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn put_entry(&self, ledger_id: i64, entry_id: i64, payload: &[u8]) -> Result<()> {
        self.entries.insert(encode_entry_key(ledger_id, entry_id), payload)?;
        debug!(ledger_id, entry_id, dir = %self.path.display(), "Stored entry");
        Ok(())
    }

    fn get_entry(&self, ledger_id: i64, entry_id: i64) -> Result<Option<Bytes>> {
        Ok(self
            .entries
            .get(encode_entry_key(ledger_id, entry_id))?
            .map(|value| Bytes::copy_from_slice(&value)))
    }

    fn contains_entry(&self, ledger_id: i64, entry_id: i64) -> Result<bool> {
        Ok(self.entries.contains_key(encode_entry_key(ledger_id, entry_id))?)
    }

    fn last_entry_id(&self, ledger_id: i64) -> Result<Option<i64>> {
        for item in self.entries.prefix(encode_ledger_prefix(ledger_id)).rev() {
            let (key, _) = item?;
            let (_, entry_id) = decode_entry_key(&key).ok_or(LedgerError::CorruptKey {
                partition: ENTRIES_PARTITION,
                len: key.len(),
            })?;
            if entry_id >= 0 {
                return Ok(Some(entry_id));
            }
        }
        Ok(None)
    }

    /// Flush and fsync everything written so far
    fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
