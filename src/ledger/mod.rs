/// Ledger storage: where entries and per-ledger state live
///
/// - [`EntryStore`]: entry storage behind one ledger directory;
///   [`LedgerStore`] is the fjall keyspace implementing it
/// - [`LedgerDirsManager`]: picks the directory for each write and tracks which
///   directories are still writable
/// - [`FenceController`]: master keys, fencing and last-add-confirmed per ledger
/// - [`LedgerIndex`]: fjall keyspace persisting master keys and fence flags
///
/// ## Layout
///
/// ```text
/// <journal_dir>/index/          ledger metadata (LedgerIndex)
/// <ledger_dir>/entries/         entry payloads (LedgerStore), one per dir
/// ```
///
/// A ledger's entries may be spread over several directories when a directory
/// fails mid-ledger; reads consult every directory.

pub mod dirs;
pub mod error;
pub mod fence;
pub mod index;
pub mod partitions;
pub mod store;

pub use dirs::{DirId, DiskSpaceProbe, LedgerDirsManager, SpaceProbe};
pub use error::{LedgerError, Result};
pub use fence::{FenceController, FenceError, LedgerState};
pub use index::{LedgerIndex, LedgerMeta};
pub use store::{EntryStore, LedgerStore};
