use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No writable ledger directory among {0} configured")]
    NoWritableLedgerDir(usize),

    #[error("Unknown ledger directory: {}", .0.display())]
    UnknownDirectory(PathBuf),

    #[error("Corrupt key in {partition}: {len} bytes")]
    CorruptKey { partition: &'static str, len: usize },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
