use thiserror::Error;

use super::callback::StatusCode;
use crate::entry::CodecError;
use crate::journal::JournalError;
use crate::ledger::{FenceError, LedgerError};

/// Why a well-formed, authorized write was refused before entering the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no writable ledger directory")]
    NoWritableLedgerDir,

    #[error("journal queue is full")]
    QueueFull,

    #[error("bookie is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error)]
pub enum BookieError {
    #[error("malformed entry: {0}")]
    MalformedEntry(#[from] CodecError),

    #[error("ledger {0} is fenced")]
    LedgerFenced(i64),

    #[error("master key mismatch for ledger {0}")]
    UnauthorizedKey(i64),

    #[error("write rejected: {0}")]
    Rejected(RejectReason),

    #[error("no such ledger: {0}")]
    NoLedger(i64),

    #[error("no entry {entry_id} in ledger {ledger_id}")]
    NoEntry { ledger_id: i64, entry_id: i64 },

    #[error("storage error: {0}")]
    Storage(LedgerError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FenceError> for BookieError {
    fn from(err: FenceError) -> Self {
        match err {
            FenceError::Fenced(ledger_id) => BookieError::LedgerFenced(ledger_id),
            FenceError::UnauthorizedKey(ledger_id) => BookieError::UnauthorizedKey(ledger_id),
        }
    }
}

impl From<LedgerError> for BookieError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NoWritableLedgerDir(_) => {
                BookieError::Rejected(RejectReason::NoWritableLedgerDir)
            }
            other => BookieError::Storage(other),
        }
    }
}

impl BookieError {
    /// True for refusals caused by the bookie's own state rather than the request
    pub fn is_rejection(&self) -> bool {
        matches!(self, BookieError::Rejected(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookieError::MalformedEntry(_)
            | BookieError::Storage(_)
            | BookieError::Journal(_)
            | BookieError::Io(_) => StatusCode::WriteError,
            BookieError::LedgerFenced(_) => StatusCode::LedgerFenced,
            BookieError::UnauthorizedKey(_) => StatusCode::UnauthorizedAccess,
            BookieError::Rejected(RejectReason::NoWritableLedgerDir) => {
                StatusCode::WriteOnReadOnlyBookie
            }
            BookieError::Rejected(_) => StatusCode::BookieUnavailable,
            BookieError::NoLedger(_) => StatusCode::NoSuchLedger,
            BookieError::NoEntry { .. } => StatusCode::NoSuchEntry,
        }
    }
}

pub type Result<T> = std::result::Result<T, BookieError>;
