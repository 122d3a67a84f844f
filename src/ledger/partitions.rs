/// Key layout for the fjall partitions
///
/// Partition structure:
/// - `entries` (per ledger directory): {ledger_id:8}{entry_id:8} -> payload
/// - `ledgers` (index keyspace): {ledger_id:8} -> LedgerMeta (JSON)
///
/// Ids are stored big-endian with the sign bit flipped, so byte order equals
/// numeric order even for the negative metadata entry id.

pub const ENTRIES_PARTITION: &str = "entries";
pub const LEDGERS_PARTITION: &str = "ledgers";

pub const ENTRY_KEY_LEN: usize = 16;
pub const LEDGER_KEY_LEN: usize = 8;

fn encode_id(id: i64) -> [u8; 8] {
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_id(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

/// Encode an entry key: {ledger_id}{entry_id}
pub fn encode_entry_key(ledger_id: i64, entry_id: i64) -> [u8; ENTRY_KEY_LEN] {
    let mut key = [0u8; ENTRY_KEY_LEN];
    key[..8].copy_from_slice(&encode_id(ledger_id));
    key[8..].copy_from_slice(&encode_id(entry_id));
    key
}

/// Decode an entry key back into (ledger_id, entry_id)
pub fn decode_entry_key(key: &[u8]) -> Option<(i64, i64)> {
    if key.len() != ENTRY_KEY_LEN {
        return None;
    }
    Some((decode_id(&key[..8])?, decode_id(&key[8..])?))
}

/// Prefix covering every entry of a ledger
pub fn encode_ledger_prefix(ledger_id: i64) -> [u8; LEDGER_KEY_LEN] {
    encode_id(ledger_id)
}

/// Encode a ledger metadata key
pub fn encode_ledger_key(ledger_id: i64) -> [u8; LEDGER_KEY_LEN] {
    encode_id(ledger_id)
}

pub fn decode_ledger_key(key: &[u8]) -> Option<i64> {
    decode_id(key)
}
