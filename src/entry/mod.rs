//! Entry envelope handling
//!
//! Every entry travels as a single buffer:
//!
//! ```text
//! +----------------+----------------+------------------+
//! | ledger_id (8B) | entry_id (8B)  | payload ...      |
//! +----------------+----------------+------------------+
//!        big-endian i64 fields, total length >= 16
//! ```
//!
//! [`decode`] validates the envelope and hands back an [`Entry`] whose payload
//! is a zero-copy window into the caller's buffer.

mod codec;

pub use codec::{
    CodecError, ENVELOPE_HEADER_LEN, Entry, INVALID_ENTRY_ID, METADATA_ENTRY_ID, decode,
    master_key_entry,
};
