use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use crc32fast::Hasher as Crc32Hasher;
use tracing::{error, info, warn};

use super::record::{BODY_HEADER_LEN, JournalRecord};
use super::{JournalError, Result};

pub const JOURNAL_FILE: &str = "journal.log";

const FRAME_HEADER_LEN: u64 = 8;

fn checksum(body: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

/// Append side of the journal. Owned by the single journal task.
///
/// A failed append or flush poisons the journal: whatever reached the file
/// past the last good frame would hide every later record from replay, so
/// nothing more is written until a restart truncates the tail.
pub struct Journal {
    path: PathBuf,
    file: BufWriter<File>,
    sync_data: bool,
    len: u64,
    poisoned: bool,
}

impl Journal {
    /// Open the journal in `dir` for appending after `valid_len` bytes.
    /// Anything past `valid_len` (a torn tail found by [`replay`]) is cut off.
    pub fn open(dir: &Path, valid_len: u64, sync_data: bool) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(path = %path.display(), on_disk, valid_len, "Truncating torn journal tail");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        Ok(Self::from_file(path, file, valid_len, sync_data))
    }

    fn from_file(path: PathBuf, file: File, len: u64, sync_data: bool) -> Self {
        Self {
            path,
            file: BufWriter::new(file),
            sync_data,
            len,
            poisoned: false,
        }
    }

    /// Buffer one record; it is not on disk until [`Journal::flush`]
    pub fn append(&mut self, record: &JournalRecord) -> Result<u64> {
        self.check_usable()?;

        let body = record.encode_body();
        let body_len = u32::try_from(body.len()).map_err(|_| {
            JournalError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "journal record larger than 4GiB",
            ))
        })?;

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN as usize + body.len());
        frame.put_u32(body_len);
        frame.put_u32(checksum(&body));
        frame.put_slice(&body);

        if let Err(e) = self.file.write_all(&frame) {
            self.poison();
            return Err(e.into());
        }

        let offset = self.len;
        self.len += frame.len() as u64;
        Ok(offset)
    }

    /// Write buffered records out and, when syncing is enabled, fsync them
    pub fn flush(&mut self) -> Result<()> {
        self.check_usable()?;

        let flushed = self.file.flush().and_then(|()| {
            if self.sync_data {
                self.file.get_ref().sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = flushed {
            self.poison();
            return Err(e.into());
        }
        Ok(())
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(JournalError::Poisoned { offset: self.len });
        }
        Ok(())
    }

    fn poison(&mut self) {
        error!(path = %self.path.display(), offset = self.len, "Journal write failed, refusing further appends");
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sequential reader over journal frames
pub struct JournalReader {
    reader: BufReader<File>,
    file_len: u64,
    offset: u64,
    done: bool,
}

impl JournalReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            file_len,
            offset: 0,
            done: false,
        })
    }

    /// Offset just past the last record returned successfully
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_frame(&mut self) -> Result<Option<JournalRecord>> {
        let offset = self.offset;
        if offset == self.file_len {
            return Ok(None);
        }
        if self.file_len - offset < FRAME_HEADER_LEN {
            return Err(JournalError::Truncated { offset });
        }

        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        self.reader.read_exact(&mut header)?;
        let body_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if self.file_len - offset - FRAME_HEADER_LEN < u64::from(body_len) {
            return Err(JournalError::Truncated { offset });
        }
        if (body_len as usize) < BODY_HEADER_LEN {
            return Err(JournalError::ChecksumMismatch { offset });
        }

        let mut body = vec![0u8; body_len as usize];
        self.reader.read_exact(&mut body)?;
        if checksum(&body) != expected_crc {
            return Err(JournalError::ChecksumMismatch { offset });
        }

        let record = JournalRecord::decode_body(Bytes::from(body))
            .map_err(|kind| JournalError::UnknownKind { kind, offset })?;
        self.offset = offset + FRAME_HEADER_LEN + u64::from(body_len);
        Ok(Some(record))
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Outcome of a journal replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Replay {
    pub records: usize,
    /// Length of the intact prefix; appends resume here
    pub valid_len: u64,
    pub torn: bool,
}

/// Stream every intact record into `apply`, one at a time. A torn or corrupt
/// record ends the replay without failing it; I/O errors and errors from
/// `apply` are fatal.
pub fn replay<F, E>(dir: &Path, mut apply: F) -> std::result::Result<Replay, E>
where
    F: FnMut(JournalRecord) -> std::result::Result<(), E>,
    E: From<JournalError>,
{
    let path = dir.join(JOURNAL_FILE);
    if !path.exists() {
        return Ok(Replay::default());
    }

    let mut reader = JournalReader::open(&path)?;
    let mut replay = Replay::default();
    for item in reader.by_ref() {
        match item {
            Ok(record) => {
                apply(record)?;
                replay.records += 1;
            }
            Err(JournalError::Io(e)) => return Err(JournalError::Io(e).into()),
            Err(e) => {
                warn!(error = %e, "Stopping journal replay");
                replay.torn = true;
            }
        }
    }
    replay.valid_len = reader.offset();

    info!(
        path = %path.display(),
        records = replay.records,
        valid_len = replay.valid_len,
        "Journal replayed"
    );
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::RecordKind;
    use tempfile::TempDir;

    fn write_records(dir: &Path, records: &[JournalRecord]) -> u64 {
        let mut journal = Journal::open(dir, 0, true).unwrap();
        for record in records {
            journal.append(record).unwrap();
        }
        journal.flush().unwrap();
        journal.len()
    }

    fn collect(dir: &Path) -> (Vec<JournalRecord>, Replay) {
        let mut records = Vec::new();
        let replayed = replay(dir, |record| {
            records.push(record);
            Ok::<_, JournalError>(())
        })
        .unwrap();
        (records, replayed)
    }

    #[test]
    fn test_append_and_replay() {
        let temp_dir = TempDir::new().unwrap();
        let records = vec![
            JournalRecord::ledger(1, Bytes::from_static(b"key")),
            JournalRecord::add_entry(1, 0, Some(Bytes::from_static(b"zero"))),
            JournalRecord::add_entry(1, 1, None),
            JournalRecord::fence(1),
        ];
        let len = write_records(temp_dir.path(), &records);

        let (replayed_records, replayed) = collect(temp_dir.path());
        assert_eq!(replayed_records, records);
        assert_eq!(replayed.records, 4);
        assert_eq!(replayed.valid_len, len);
        assert!(!replayed.torn);
    }

    #[test]
    fn test_replay_missing_journal() {
        let temp_dir = TempDir::new().unwrap();
        let (records, replayed) = collect(temp_dir.path());
        assert!(records.is_empty());
        assert_eq!(replayed, Replay::default());
    }

    #[test]
    fn test_replay_stops_on_apply_error() {
        let temp_dir = TempDir::new().unwrap();
        write_records(
            temp_dir.path(),
            &[JournalRecord::fence(1), JournalRecord::fence(2)],
        );

        let mut seen = 0;
        let result = replay(temp_dir.path(), |_| {
            seen += 1;
            Err(JournalError::Truncated { offset: 0 })
        });
        assert!(matches!(result, Err(JournalError::Truncated { .. })));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_torn_tail_is_dropped_and_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let first = JournalRecord::add_entry(2, 0, Some(Bytes::from_static(b"kept")));
        let intact = write_records(temp_dir.path(), std::slice::from_ref(&first));

        // half-written second frame
        let path = temp_dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0, 0, 0, 40, 1, 2]).unwrap();
        drop(file);

        let (records, replayed) = collect(temp_dir.path());
        assert!(replayed.torn);
        assert_eq!(records, vec![first.clone()]);
        assert_eq!(replayed.valid_len, intact);

        let mut journal = Journal::open(temp_dir.path(), replayed.valid_len, true).unwrap();
        journal.append(&JournalRecord::fence(2)).unwrap();
        journal.flush().unwrap();

        let kinds: Vec<RecordKind> = collect(temp_dir.path())
            .0
            .iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, vec![RecordKind::AddEntry, RecordKind::Fence]);
    }

    #[test]
    fn test_corrupt_checksum_stops_replay() {
        let temp_dir = TempDir::new().unwrap();
        write_records(
            temp_dir.path(),
            &[
                JournalRecord::add_entry(3, 0, Some(Bytes::from_static(b"a"))),
                JournalRecord::add_entry(3, 1, Some(Bytes::from_static(b"b"))),
            ],
        );

        let path = temp_dir.path().join(JOURNAL_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let (records, replayed) = collect(temp_dir.path());
        assert!(replayed.torn);
        assert_eq!(records.len(), 1);
    }

    /// Journal over a device that fails every write with ENOSPC
    #[cfg(target_os = "linux")]
    fn full_device_journal() -> Journal {
        let file = OpenOptions::new().write(true).open("/dev/full").unwrap();
        Journal::from_file(PathBuf::from("/dev/full"), file, 0, true)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_append_poisons_journal() {
        let mut journal = full_device_journal();

        // larger than the write buffer, so it goes straight to the device
        let big = JournalRecord::add_entry(1, 0, Some(Bytes::from(vec![7u8; 64 * 1024])));
        assert!(matches!(journal.append(&big), Err(JournalError::Io(_))));
        assert!(journal.is_poisoned());
        assert_eq!(journal.len(), 0);

        assert!(matches!(
            journal.append(&JournalRecord::fence(1)),
            Err(JournalError::Poisoned { offset: 0 })
        ));
        assert!(matches!(journal.flush(), Err(JournalError::Poisoned { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_flush_poisons_journal() {
        let mut journal = full_device_journal();

        journal.append(&JournalRecord::fence(1)).unwrap();
        assert!(matches!(journal.flush(), Err(JournalError::Io(_))));
        assert!(journal.is_poisoned());
        assert!(matches!(
            journal.append(&JournalRecord::fence(2)),
            Err(JournalError::Poisoned { .. })
        ));
    }
}
