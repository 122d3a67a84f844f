//! Startup reconciliation of the journal against the ledger stores

use std::path::Path;

use tracing::{debug, info, warn};

use super::error::Result;
use crate::journal::{self, JournalRecord, RecordKind, Replay};
use crate::ledger::{FenceController, LedgerDirsManager, LedgerError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecoveryStats {
    pub ledgers: usize,
    pub adds: usize,
    pub rewritten: usize,
    pub fences: usize,
    pub skipped: usize,
}

impl RecoveryStats {
    pub(crate) fn changed_state(&self) -> bool {
        self.ledgers > 0 || self.rewritten > 0 || self.fences > 0
    }
}

/// Highest entry id stored for `ledger_id` across every directory
pub(crate) fn last_stored_entry(
    dirs: &LedgerDirsManager,
    ledger_id: i64,
) -> std::result::Result<Option<i64>, LedgerError> {
    let mut last = None;
    for store in dirs.stores() {
        if let Some(entry_id) = store.last_entry_id(ledger_id)? {
            last = last.max(Some(entry_id));
        }
    }
    Ok(last)
}

fn stored_anywhere(
    dirs: &LedgerDirsManager,
    ledger_id: i64,
    entry_id: i64,
) -> std::result::Result<bool, LedgerError> {
    for store in dirs.stores() {
        if store.contains_entry(ledger_id, entry_id)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn apply_record(
    record: JournalRecord,
    dirs: &LedgerDirsManager,
    fences: &FenceController,
    stats: &mut RecoveryStats,
) -> Result<()> {
    let ledger_id = record.ledger_id;
    match record.kind {
        RecordKind::Ledger => {
            let master_key = record.payload.unwrap_or_default();
            if fences.restore_ledger(ledger_id, &master_key)? {
                debug!(ledger_id, "Ledger restored from journal");
                stats.ledgers += 1;
            }
        }
        RecordKind::AddEntry => {
            stats.adds += 1;
            let Some(ledger) = fences.get(ledger_id) else {
                warn!(ledger_id, entry_id = record.entry_id, "Journaled entry for unknown ledger");
                stats.skipped += 1;
                return Ok(());
            };

            if !stored_anywhere(dirs, ledger_id, record.entry_id)? {
                let Some(payload) = &record.payload else {
                    debug!(ledger_id, entry_id = record.entry_id, "Journal holds no payload to restore");
                    stats.skipped += 1;
                    return Ok(());
                };
                let dir = dirs.allocate()?;
                dirs.store(dir).put_entry(ledger_id, record.entry_id, payload)?;
                stats.rewritten += 1;
            }
            ledger.advance_last_add_confirmed(record.entry_id);
        }
        RecordKind::Fence => {
            if fences.fence_replayed(ledger_id)? {
                stats.fences += 1;
            } else {
                warn!(ledger_id, "Journaled fence for unknown ledger");
                stats.skipped += 1;
            }
        }
    }
    Ok(())
}

/// Stream the journal in `journal_dir` through the stores and ledger state.
///
/// Ledger records recreate ledgers the index lost. An add missing from every
/// directory is written again when the journal kept its payload. Entries
/// found (or restored) count toward last-add-confirmed.
pub(crate) fn apply_journal(
    journal_dir: &Path,
    dirs: &LedgerDirsManager,
    fences: &FenceController,
) -> Result<(Replay, RecoveryStats)> {
    let mut stats = RecoveryStats::default();
    let replayed = journal::replay(journal_dir, |record| {
        apply_record(record, dirs, fences, &mut stats)
    })?;

    info!(
        ledgers = stats.ledgers,
        adds = stats.adds,
        rewritten = stats.rewritten,
        fences = stats.fences,
        skipped = stats.skipped,
        torn = replayed.torn,
        "Journal applied"
    );
    Ok((replayed, stats))
}
