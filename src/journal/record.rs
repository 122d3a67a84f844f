use bytes::{Buf, BufMut, Bytes, BytesMut};

const FLAG_HAS_PAYLOAD: u8 = 0b0000_0001;

/// Fixed part of a record body: kind, flags and both ids
pub(crate) const BODY_HEADER_LEN: usize = 1 + 1 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    AddEntry = 1,
    Fence = 2,
    /// First sighting of a ledger; the payload is its master key
    Ledger = 3,
}

impl RecordKind {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::AddEntry),
            2 => Some(Self::Fence),
            3 => Some(Self::Ledger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub kind: RecordKind,
    pub ledger_id: i64,
    pub entry_id: i64,
    /// `None` when the journal runs without data (metadata-only records)
    pub payload: Option<Bytes>,
}

impl JournalRecord {
    pub fn add_entry(ledger_id: i64, entry_id: i64, payload: Option<Bytes>) -> Self {
        Self {
            kind: RecordKind::AddEntry,
            ledger_id,
            entry_id,
            payload,
        }
    }

    pub fn fence(ledger_id: i64) -> Self {
        Self {
            kind: RecordKind::Fence,
            ledger_id,
            entry_id: crate::entry::INVALID_ENTRY_ID,
            payload: None,
        }
    }

    pub fn ledger(ledger_id: i64, master_key: Bytes) -> Self {
        Self {
            kind: RecordKind::Ledger,
            ledger_id,
            entry_id: crate::entry::INVALID_ENTRY_ID,
            payload: Some(master_key),
        }
    }

    pub(crate) fn encode_body(&self) -> Bytes {
        let payload_len = self.payload.as_ref().map_or(0, Bytes::len);
        let mut body = BytesMut::with_capacity(BODY_HEADER_LEN + payload_len);
        body.put_u8(self.kind as u8);
        body.put_u8(if self.payload.is_some() { FLAG_HAS_PAYLOAD } else { 0 });
        body.put_i64(self.ledger_id);
        body.put_i64(self.entry_id);
        if let Some(payload) = &self.payload {
            body.put_slice(payload);
        }
        body.freeze()
    }

    /// Parse a checksummed body. Returns the unknown kind byte on failure.
    pub(crate) fn decode_body(mut body: Bytes) -> Result<Self, u8> {
        if body.len() < BODY_HEADER_LEN {
            return Err(0);
        }
        let raw_kind = body.get_u8();
        let kind = RecordKind::from_u8(raw_kind).ok_or(raw_kind)?;
        let flags = body.get_u8();
        let ledger_id = body.get_i64();
        let entry_id = body.get_i64();
        let payload = (flags & FLAG_HAS_PAYLOAD != 0).then_some(body);

        Ok(Self {
            kind,
            ledger_id,
            entry_id,
            payload,
        })
    }
}
