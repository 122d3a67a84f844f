use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bookie: BookieConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Admin HTTP server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8000))
}

/// Entry engine: journal, ledger directories and write pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookieConfig {
    /// Identifier reported in every write completion
    #[serde(default = "default_bookie_id")]
    pub bookie_id: String,
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
    #[serde(default = "default_ledger_dirs")]
    pub ledger_dirs: Vec<PathBuf>,
    /// Directories with less free space are skipped by allocation
    #[serde(default)]
    pub min_free_space: ByteSize,
    /// Keep entry payloads in the journal, not just their ids
    #[serde(default = "default_true")]
    pub journal_write_data: bool,
    /// fsync the journal after every batch
    #[serde(default = "default_true")]
    pub journal_sync_data: bool,
    #[serde(default = "default_journal_queue_size")]
    pub journal_queue_size: usize,
    #[serde(default = "default_journal_max_batch")]
    pub journal_max_batch: usize,
    /// Accepted in place of any ledger's own master key
    #[serde(default)]
    pub all_writers_key: Option<String>,
}

impl Default for BookieConfig {
    fn default() -> Self {
        Self {
            bookie_id: default_bookie_id(),
            journal_dir: default_journal_dir(),
            ledger_dirs: default_ledger_dirs(),
            min_free_space: ByteSize::ZERO,
            journal_write_data: true,
            journal_sync_data: true,
            journal_queue_size: default_journal_queue_size(),
            journal_max_batch: default_journal_max_batch(),
            all_writers_key: None,
        }
    }
}

impl BookieConfig {
    /// Configuration rooted in a single data directory; handy for tests and
    /// single-disk deployments.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>, ledger_dirs: usize) -> Self {
        let data_dir = data_dir.into();
        Self {
            journal_dir: data_dir.join("journal"),
            ledger_dirs: (0..ledger_dirs.max(1))
                .map(|i| data_dir.join(format!("ledgers-{i}")))
                .collect(),
            ..Self::default()
        }
    }
}

fn default_bookie_id() -> String {
    "127.0.0.1:3181".to_string()
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("data/journal")
}

fn default_ledger_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("data/ledgers")]
}

fn default_true() -> bool {
    true
}

fn default_journal_queue_size() -> usize {
    10_000
}

fn default_journal_max_batch() -> usize {
    256
}

/// Connection authorization
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Roles allowed to connect, matched against the certificate's OU
    #[serde(default)]
    pub authorized_roles: BTreeSet<String>,
}

impl AuthConfig {
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            authorized_roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}
