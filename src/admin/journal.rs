use std::path::Path;

use serde::Serialize;

use crate::admin::{AdminError, Result};
use crate::primitives::io::Location;
use crate::primitives::journal::Journal;
use crate::store::JOURNAL_FILE;

/// Payload bytes shown in a listing.
pub const PAYLOAD_PREVIEW_BYTES: usize = 16;

/// One journal entry with a hex preview of its payload.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntrySummary {
    pub position: u64,
    pub kind: &'static str,
    pub file_ref: String,
    pub id: u64,
    pub payload_len: usize,
    /// First [`PAYLOAD_PREVIEW_BYTES`] of the payload, lower-case hex.
    pub payload_head: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalListing {
    /// Bytes after the header.
    pub bytes: u64,
    pub entries: Vec<JournalEntrySummary>,
}

/// Lists the journal of the store at `path` without opening the store.
///
/// Do not point this at a store another process has open: a torn tail is
/// trimmed when the journal file is opened.
pub fn journal_entries(path: impl AsRef<Path>) -> Result<JournalListing> {
    let path = path.as_ref();
    if !path.join(JOURNAL_FILE).exists() {
        return Err(AdminError::missing_store(path));
    }
    let location = Location::dir(path)?;
    let journal = Journal::open(location.open_file(JOURNAL_FILE)?)?;
    let entries = journal
        .entries()?
        .map(|item| {
            item.map(|(position, entry)| JournalEntrySummary {
                position,
                kind: entry.kind.as_str(),
                file_ref: entry.file_ref.to_string(),
                id: entry.id,
                payload_len: entry.payload.len(),
                payload_head: hex::encode(&entry.payload[..entry.payload.len().min(PAYLOAD_PREVIEW_BYTES)]),
            })
        })
        .collect::<crate::types::Result<Vec<_>>>()?;
    Ok(JournalListing {
        bytes: journal.len(),
        entries,
    })
}
