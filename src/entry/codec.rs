use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the two identifier fields that lead every envelope
pub const ENVELOPE_HEADER_LEN: usize = 16;

/// Entry id reserved for the entry that records a ledger's master key
pub const METADATA_ENTRY_ID: i64 = -0x1000;

/// Sentinel for "no entry": the last-add-confirmed of a ledger with no acked adds
pub const INVALID_ENTRY_ID: i64 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("entry buffer too short: {len} bytes, need at least {ENVELOPE_HEADER_LEN}")]
    TooShort { len: usize },

    #[error("negative ledger id {0}")]
    NegativeLedgerId(i64),

    #[error("negative entry id {0}")]
    NegativeEntryId(i64),
}

/// A decoded entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub ledger_id: i64,
    pub entry_id: i64,
    pub payload: Bytes,
}

impl Entry {
    pub fn new(ledger_id: i64, entry_id: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            ledger_id,
            entry_id,
            payload: payload.into(),
        }
    }

    /// Serialize back into the wire envelope
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + self.payload.len());
        buf.put_i64(self.ledger_id);
        buf.put_i64(self.entry_id);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn is_metadata(&self) -> bool {
        self.entry_id == METADATA_ENTRY_ID
    }
}

/// Validate an envelope and split it into identifiers and payload.
///
/// The caller's buffer is only borrowed: its cursor never moves, so a rejected
/// buffer is left exactly as it was handed in. The returned payload shares the
/// buffer's storage.
pub fn decode(buf: &Bytes) -> Result<Entry, CodecError> {
    let header: &[u8; ENVELOPE_HEADER_LEN] = buf
        .get(..ENVELOPE_HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(CodecError::TooShort { len: buf.len() })?;

    let (ledger_bytes, entry_bytes) = header.split_at(8);
    let ledger_id = i64::from_be_bytes(read_id(ledger_bytes));
    let entry_id = i64::from_be_bytes(read_id(entry_bytes));

    if ledger_id < 0 {
        return Err(CodecError::NegativeLedgerId(ledger_id));
    }
    if entry_id < 0 && entry_id != METADATA_ENTRY_ID {
        return Err(CodecError::NegativeEntryId(entry_id));
    }

    Ok(Entry {
        ledger_id,
        entry_id,
        payload: buf.slice(ENVELOPE_HEADER_LEN..),
    })
}

fn read_id(bytes: &[u8]) -> [u8; 8] {
    let mut id = [0u8; 8];
    id.copy_from_slice(bytes);
    id
}

/// Build the metadata entry that carries `master_key` for `ledger_id`
pub fn master_key_entry(ledger_id: i64, master_key: &[u8]) -> Bytes {
    Entry::new(ledger_id, METADATA_ENTRY_ID, Bytes::copy_from_slice(master_key)).encode()
}
