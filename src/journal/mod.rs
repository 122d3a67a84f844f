//! Write-ahead journal
//!
//! Every accepted add (and every fence) is appended here before the entry
//! reaches a ledger directory, and a ledger's first record is preceded by a
//! ledger record carrying its master key. On start the journal is replayed so
//! entries that were journaled but never made it to a ledger store are not
//! lost.
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! | body_len: u32 | crc32(body): u32 | body ... |
//! body = kind: u8 | flags: u8 | ledger_id: i64 | entry_id: i64 | payload ...
//! ```

mod record;
mod writer;

pub use record::{JournalRecord, RecordKind};
pub use writer::{JOURNAL_FILE, Journal, JournalReader, Replay, replay};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    #[error("torn record at offset {offset}")]
    Truncated { offset: u64 },

    #[error("unknown record kind {kind} at offset {offset}")]
    UnknownKind { kind: u8, offset: u64 },

    #[error("journal unusable after a failed write at offset {offset}")]
    Poisoned { offset: u64 },
}

pub type Result<T> = std::result::Result<T, JournalError>;
