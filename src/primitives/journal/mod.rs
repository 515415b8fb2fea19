#![forbid(unsafe_code)]
//! Transaction journal: an append-only log of checksummed entries.
//!
//! A committed transaction is a `Begin` marker, a run of `Object`, `Block`
//! and `Buffer` entries, and a `Commit` marker. Recovery replays complete
//! runs and ignores a run closed by `Abort`, cut short by the next `Begin`,
//! or left without a marker at the tail.

use std::fmt;
use std::io::IoSlice;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::primitives::bytes::buf::Cursor;
use crate::primitives::io::FileIo;
use crate::types::checksum::crc32_chunks;
use crate::types::{Result, TdbError, TxnId};

const JOURNAL_MAGIC: [u8; 4] = *b"TDBJ";
const JOURNAL_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 16;
/// total_len(4) kind(1) ref_len(2) id(8) payload_len(4)
const ENTRY_HEADER_LEN: usize = 19;
const ENTRY_TRAILER_LEN: usize = 4;
const MAX_ENTRY_LEN: u32 = 1 << 30;

/// Kind of a journal entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum JournalEntryKind {
    /// Closes a committed transaction; `id` is the transaction id.
    Commit,
    /// Closes an aborted transaction; `id` is the transaction id.
    Abort,
    /// Data block for a named file (tuple table changes).
    Block,
    /// Small state buffer for a named component.
    Buffer,
    /// Object bytes to append; `id` is the offset they must land at.
    Object,
    /// Informational marker written after a checkpoint.
    Checkpoint,
    /// Opens a transaction's run; `id` is the transaction id.
    Begin,
}

impl JournalEntryKind {
    fn code(self) -> u8 {
        match self {
            JournalEntryKind::Commit => 1,
            JournalEntryKind::Abort => 2,
            JournalEntryKind::Block => 3,
            JournalEntryKind::Buffer => 4,
            JournalEntryKind::Object => 5,
            JournalEntryKind::Checkpoint => 6,
            JournalEntryKind::Begin => 7,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => JournalEntryKind::Commit,
            2 => JournalEntryKind::Abort,
            3 => JournalEntryKind::Block,
            4 => JournalEntryKind::Buffer,
            5 => JournalEntryKind::Object,
            6 => JournalEntryKind::Checkpoint,
            7 => JournalEntryKind::Begin,
            _ => return None,
        })
    }

    /// Short label for listings.
    pub fn as_str(self) -> &'static str {
        match self {
            JournalEntryKind::Commit => "commit",
            JournalEntryKind::Abort => "abort",
            JournalEntryKind::Block => "block",
            JournalEntryKind::Buffer => "buffer",
            JournalEntryKind::Object => "object",
            JournalEntryKind::Checkpoint => "checkpoint",
            JournalEntryKind::Begin => "begin",
        }
    }
}

/// Names the component a journal entry targets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileRef(Arc<str>);

impl FileRef {
    /// Builds a reference from a component name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        FileRef(name.into())
    }

    /// Component name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference used by transaction markers.
    pub fn transaction() -> Self {
        FileRef::new("txn")
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One journal record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    /// What the entry means.
    pub kind: JournalEntryKind,
    /// Target component.
    pub file_ref: FileRef,
    /// Transaction id, object offset or block number depending on `kind`.
    pub id: u64,
    /// Entry bytes.
    pub payload: Vec<u8>,
}

impl JournalEntry {
    /// Marker opening the run of `txn`.
    pub fn begin(txn: TxnId) -> Self {
        Self {
            kind: JournalEntryKind::Begin,
            file_ref: FileRef::transaction(),
            id: txn.0,
            payload: Vec::new(),
        }
    }

    /// Commit marker for `txn`.
    pub fn commit(txn: TxnId) -> Self {
        Self {
            kind: JournalEntryKind::Commit,
            file_ref: FileRef::transaction(),
            id: txn.0,
            payload: Vec::new(),
        }
    }

    /// Abort marker for `txn`.
    pub fn abort(txn: TxnId) -> Self {
        Self {
            kind: JournalEntryKind::Abort,
            file_ref: FileRef::transaction(),
            id: txn.0,
            payload: Vec::new(),
        }
    }

    /// Object bytes destined for `offset` in `file_ref`.
    pub fn object(file_ref: FileRef, offset: u64, bytes: Vec<u8>) -> Self {
        Self {
            kind: JournalEntryKind::Object,
            file_ref,
            id: offset,
            payload: bytes,
        }
    }

    /// Data block for `file_ref`.
    pub fn block(file_ref: FileRef, id: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: JournalEntryKind::Block,
            file_ref,
            id,
            payload,
        }
    }

    /// State buffer for `file_ref`.
    pub fn buffer(file_ref: FileRef, id: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: JournalEntryKind::Buffer,
            file_ref,
            id,
            payload,
        }
    }

    /// Marker written after a checkpoint; `id` is the checkpointed version.
    pub fn checkpoint(version: u64) -> Self {
        Self {
            kind: JournalEntryKind::Checkpoint,
            file_ref: FileRef::transaction(),
            id: version,
            payload: Vec::new(),
        }
    }

    fn encoded_len(&self) -> usize {
        ENTRY_HEADER_LEN + self.file_ref.as_str().len() + self.payload.len() + ENTRY_TRAILER_LEN
    }
}

/// Statistics tracking journal operations.
#[derive(Clone, Debug, Default)]
pub struct JournalStats {
    /// Entries appended since open or the last truncate.
    pub entries_appended: u64,
    /// Bytes appended since open or the last truncate.
    pub bytes_appended: u64,
    /// Number of sync operations performed.
    pub syncs: u64,
    /// Number of truncations.
    pub truncations: u64,
}

struct JournalState {
    append_offset: u64,
    stats: JournalStats,
}

/// The transaction journal.
pub struct Journal {
    io: Arc<dyn FileIo>,
    state: Mutex<JournalState>,
}

impl Journal {
    /// Opens or creates a journal. A torn tail left by a crash is cut off.
    pub fn open(io: Arc<dyn FileIo>) -> Result<Self> {
        let len = io.len()?;
        if len < FILE_HEADER_LEN as u64 {
            io.write_at(0, &encode_header())?;
            io.truncate(FILE_HEADER_LEN as u64)?;
        } else {
            let mut buf = [0u8; FILE_HEADER_LEN];
            io.read_at(0, &mut buf)?;
            decode_header(&buf)?;
        }
        let journal = Self {
            io,
            state: Mutex::new(JournalState {
                append_offset: FILE_HEADER_LEN as u64,
                stats: JournalStats::default(),
            }),
        };
        let mut iter = journal.entries()?;
        let mut count = 0u64;
        for entry in iter.by_ref() {
            entry?;
            count += 1;
        }
        let valid = iter.valid_up_to();
        let file_len = journal.io.len()?;
        if valid < file_len {
            warn!(valid, file_len, "journal.open.torn_tail");
            journal.io.truncate(valid)?;
        }
        journal.state.lock().append_offset = valid;
        debug!(entries = count, bytes = valid, "journal.open");
        Ok(journal)
    }

    /// Appends an entry and returns its position.
    pub fn write(&self, entry: &JournalEntry) -> Result<u64> {
        let file_ref = entry.file_ref.as_str().as_bytes();
        let ref_len =
            u16::try_from(file_ref.len()).map_err(|_| TdbError::Invalid("file ref too long"))?;
        let payload_len = u32::try_from(entry.payload.len())
            .ok()
            .filter(|len| *len < MAX_ENTRY_LEN)
            .ok_or(TdbError::Invalid("journal payload too large"))?;
        let total = entry.encoded_len() as u32;

        let mut header = [0u8; ENTRY_HEADER_LEN];
        header[0..4].copy_from_slice(&total.to_be_bytes());
        header[4] = entry.kind.code();
        header[5..7].copy_from_slice(&ref_len.to_be_bytes());
        header[7..15].copy_from_slice(&entry.id.to_be_bytes());
        header[15..19].copy_from_slice(&payload_len.to_be_bytes());
        let crc = crc32_chunks(&[&header, file_ref, &entry.payload]).to_be_bytes();

        let mut state = self.state.lock();
        let position = state.append_offset;
        self.io.writev_at(
            position,
            &[
                IoSlice::new(&header),
                IoSlice::new(file_ref),
                IoSlice::new(&entry.payload),
                IoSlice::new(&crc),
            ],
        )?;
        state.append_offset += u64::from(total);
        state.stats.entries_appended += 1;
        state.stats.bytes_appended += u64::from(total);
        trace!(
            position,
            kind = entry.kind.as_str(),
            file_ref = %entry.file_ref,
            id = entry.id,
            len = entry.payload.len(),
            "journal.write"
        );
        Ok(position)
    }

    /// Reads the entry at `position`, as returned by [`Journal::write`].
    pub fn read(&self, position: u64) -> Result<JournalEntry> {
        let end = self.state.lock().append_offset;
        match read_entry(&*self.io, position, end)? {
            Some((entry, _)) => Ok(entry),
            None => Err(TdbError::CorruptionAt {
                file: "journal".to_owned(),
                offset: position,
                reason: "invalid journal entry",
            }),
        }
    }

    /// Iterates entries from the start of the journal.
    pub fn entries(&self) -> Result<JournalIter> {
        let end = self.io.len()?;
        Ok(JournalIter {
            io: Arc::clone(&self.io),
            offset: FILE_HEADER_LEN as u64,
            end,
            valid_up_to: FILE_HEADER_LEN as u64,
        })
    }

    /// Syncs appended entries to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()?;
        self.state.lock().stats.syncs += 1;
        Ok(())
    }

    /// Drops every entry, leaving an empty journal.
    pub fn truncate(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.io.truncate(FILE_HEADER_LEN as u64)?;
        self.io.sync_all()?;
        state.append_offset = FILE_HEADER_LEN as u64;
        state.stats.truncations += 1;
        debug!("journal.truncate");
        Ok(())
    }

    /// Bytes of entries currently in the journal.
    pub fn len(&self) -> u64 {
        self.state.lock().append_offset - FILE_HEADER_LEN as u64
    }

    /// Returns true if the journal holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns current statistics for this journal.
    pub fn stats(&self) -> JournalStats {
        self.state.lock().stats.clone()
    }
}

fn encode_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..4].copy_from_slice(&JOURNAL_MAGIC);
    buf[4..6].copy_from_slice(&JOURNAL_FORMAT_VERSION.to_be_bytes());
    let crc = crc32_chunks(&[&buf[..12]]);
    buf[12..16].copy_from_slice(&crc.to_be_bytes());
    buf
}

fn decode_header(buf: &[u8; FILE_HEADER_LEN]) -> Result<()> {
    if buf[0..4] != JOURNAL_MAGIC {
        return Err(TdbError::Corruption("journal magic mismatch"));
    }
    if u16::from_be_bytes([buf[4], buf[5]]) != JOURNAL_FORMAT_VERSION {
        return Err(TdbError::Corruption("journal format version mismatch"));
    }
    let stored = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
    if crc32_chunks(&[&buf[..12]]) != stored {
        return Err(TdbError::Corruption("journal header crc mismatch"));
    }
    Ok(())
}

/// Reads one entry; `None` means the bytes at `position` are not a valid entry.
fn read_entry(io: &dyn FileIo, position: u64, end: u64) -> Result<Option<(JournalEntry, u64)>> {
    if position < FILE_HEADER_LEN as u64 || position + ENTRY_HEADER_LEN as u64 > end {
        return Ok(None);
    }
    let mut header = [0u8; ENTRY_HEADER_LEN];
    io.read_at(position, &mut header)?;
    let total = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let ref_len = usize::from(u16::from_be_bytes([header[5], header[6]]));
    let payload_len = u32::from_be_bytes([header[15], header[16], header[17], header[18]]) as usize;
    let expected = ENTRY_HEADER_LEN + ref_len + payload_len + ENTRY_TRAILER_LEN;
    if total >= MAX_ENTRY_LEN || total as usize != expected || position + u64::from(total) > end {
        return Ok(None);
    }
    let mut body = vec![0u8; expected - ENTRY_HEADER_LEN];
    io.read_at(position + ENTRY_HEADER_LEN as u64, &mut body)?;
    let (content, trailer) = body.split_at(ref_len + payload_len);
    let stored_crc = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32_chunks(&[&header, content]) != stored_crc {
        return Ok(None);
    }
    let Some(kind) = JournalEntryKind::from_code(header[4]) else {
        return Ok(None);
    };
    let mut cursor = Cursor::new(content);
    let file_ref = std::str::from_utf8(cursor.take(ref_len)?)
        .map_err(|_| TdbError::Corruption("journal file ref not UTF-8"))?;
    let payload = cursor.take(payload_len)?.to_vec();
    let mut id_bytes = Cursor::new(&header[7..15]);
    let entry = JournalEntry {
        kind,
        file_ref: FileRef::new(file_ref),
        id: id_bytes.u64_be()?,
        payload,
    };
    Ok(Some((entry, position + u64::from(total))))
}

/// Iterator over `(position, entry)` pairs.
///
/// Stops at the end of the journal or at the first entry that fails validation.
pub struct JournalIter {
    io: Arc<dyn FileIo>,
    offset: u64,
    end: u64,
    valid_up_to: u64,
}

impl JournalIter {
    /// Offset up to which entries have been validated.
    pub fn valid_up_to(&self) -> u64 {
        self.valid_up_to
    }
}

impl Iterator for JournalIter {
    type Item = Result<(u64, JournalEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let position = self.offset;
        match read_entry(&*self.io, position, self.end) {
            Ok(Some((entry, next))) => {
                self.offset = next;
                self.valid_up_to = next;
                Some(Ok((position, entry)))
            }
            Ok(None) => {
                self.offset = self.end;
                None
            }
            Err(err) => {
                self.offset = self.end;
                Some(Err(err))
            }
        }
    }
}
