//! Ledger directory selection and failover
//!
//! Each configured directory owns an [`EntryStore`]. Writes go to the writable
//! directory with the most free space; a directory that fails a write is
//! marked unwritable and skipped until something marks it writable again.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::error::{LedgerError, Result};
use super::store::{EntryStore, LedgerStore};

/// Source of free-space readings for a directory
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> std::io::Result<u64>;
}

/// Reads free space from the filesystem holding the directory
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Index of a directory inside the manager
pub type DirId = usize;

pub struct LedgerDirsManager {
    stores: Vec<Box<dyn EntryStore>>,
    writable: RwLock<Vec<bool>>,
    probe: Arc<dyn SpaceProbe>,
    min_free_space: u64,
}

impl LedgerDirsManager {
    /// Open a store in every directory; all start out writable
    pub fn open(
        paths: &[PathBuf],
        min_free_space: u64,
        probe: Arc<dyn SpaceProbe>,
    ) -> Result<Self> {
        let stores = paths
            .iter()
            .map(|path| -> Result<Box<dyn EntryStore>> { Ok(Box::new(LedgerStore::open(path)?)) })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_stores(stores, min_free_space, probe))
    }

    /// Manage already opened stores, in allocation-tie order
    pub fn from_stores(
        stores: Vec<Box<dyn EntryStore>>,
        min_free_space: u64,
        probe: Arc<dyn SpaceProbe>,
    ) -> Self {
        info!(dirs = stores.len(), min_free_space, "Ledger directories ready");
        Self {
            writable: RwLock::new(vec![true; stores.len()]),
            stores,
            probe,
            min_free_space,
        }
    }

    /// Pick the writable directory with the most free space.
    ///
    /// Directories whose free space cannot be read or is below the configured
    /// minimum are passed over without being marked. Ties go to the directory
    /// listed first.
    pub fn allocate(&self) -> Result<DirId> {
        let writable = self.writable.read().unwrap_or_else(PoisonError::into_inner);

        let mut best: Option<(DirId, u64)> = None;
        for (dir, store) in self.stores.iter().enumerate() {
            if !writable[dir] {
                continue;
            }
            let free = match self.probe.available_space(store.path()) {
                Ok(free) => free,
                Err(e) => {
                    warn!(dir = %store.path().display(), error = %e, "Cannot read free space");
                    continue;
                }
            };
            if free < self.min_free_space {
                debug!(dir = %store.path().display(), free, "Directory below free space threshold");
                continue;
            }
            if best.is_none_or(|(_, most)| free > most) {
                best = Some((dir, free));
            }
        }

        best.map(|(dir, _)| dir)
            .ok_or(LedgerError::NoWritableLedgerDir(self.stores.len()))
    }

    /// Exclude a directory from future allocations. Returns false if it was
    /// already excluded.
    pub fn mark_unwritable(&self, dir: DirId) -> bool {
        let mut writable = self.writable.write().unwrap_or_else(PoisonError::into_inner);
        match writable.get_mut(dir) {
            Some(flag) if *flag => {
                *flag = false;
                warn!(dir = %self.stores[dir].path().display(), "Ledger directory marked unwritable");
                true
            }
            _ => false,
        }
    }

    /// Put a directory back into rotation after it has recovered
    pub fn mark_writable(&self, dir: DirId) -> bool {
        let mut writable = self.writable.write().unwrap_or_else(PoisonError::into_inner);
        match writable.get_mut(dir) {
            Some(flag) if !*flag => {
                *flag = true;
                info!(dir = %self.stores[dir].path().display(), "Ledger directory writable again");
                true
            }
            _ => false,
        }
    }

    pub fn is_writable(&self, dir: DirId) -> bool {
        let writable = self.writable.read().unwrap_or_else(PoisonError::into_inner);
        writable.get(dir).copied().unwrap_or(false)
    }

    pub fn find(&self, path: &Path) -> Result<DirId> {
        self.stores
            .iter()
            .position(|store| store.path() == path)
            .ok_or_else(|| LedgerError::UnknownDirectory(path.to_path_buf()))
    }

    pub fn writable_dirs(&self) -> Vec<PathBuf> {
        let writable = self.writable.read().unwrap_or_else(PoisonError::into_inner);
        self.stores
            .iter()
            .zip(writable.iter())
            .filter(|(_, ok)| **ok)
            .map(|(store, _)| store.path().to_path_buf())
            .collect()
    }

    pub fn store(&self, dir: DirId) -> &dyn EntryStore {
        self.stores[dir].as_ref()
    }

    /// All stores, writable or not; reads consult every one of them
    pub fn stores(&self) -> &[Box<dyn EntryStore>] {
        &self.stores
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
