//! Persisted per-ledger metadata: master key and fenced flag

use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{LedgerError, Result};
use super::partitions::{LEDGERS_PARTITION, decode_ledger_key, encode_ledger_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMeta {
    pub master_key: Vec<u8>,
    #[serde(default)]
    pub fenced: bool,
}

#[derive(Clone)]
pub struct LedgerIndex {
    keyspace: Keyspace,
    ledgers: PartitionHandle,
}

impl LedgerIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening ledger index");
        std::fs::create_dir_all(path)?;

        let keyspace = Config::new(path).open()?;
        let ledgers = keyspace.open_partition(LEDGERS_PARTITION, PartitionCreateOptions::default())?;
        Ok(Self { keyspace, ledgers })
    }

    pub fn put(&self, ledger_id: i64, meta: &LedgerMeta) -> Result<()> {
        let value = serde_json::to_vec(meta)?;
        self.ledgers.insert(encode_ledger_key(ledger_id), value)?;
        Ok(())
    }

    pub fn get(&self, ledger_id: i64) -> Result<Option<LedgerMeta>> {
        match self.ledgers.get(encode_ledger_key(ledger_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Every ledger this node has seen, in id order
    pub fn load_all(&self) -> Result<Vec<(i64, LedgerMeta)>> {
        let mut ledgers = Vec::new();
        for item in self.ledgers.iter() {
            let (key, value) = item?;
            let ledger_id = decode_ledger_key(&key).ok_or(LedgerError::CorruptKey {
                partition: LEDGERS_PARTITION,
                len: key.len(),
            })?;
            ledgers.push((ledger_id, serde_json::from_slice(&value)?));
        }
        Ok(ledgers)
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
