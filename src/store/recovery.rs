#![forbid(unsafe_code)]

use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::STATE_REF;
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::journal::{Journal, JournalEntry, JournalEntryKind};
use crate::primitives::objectfile::ObjectFile;
use crate::storage::tuple::{TupleChange, TupleTable};
use crate::types::{Result, TdbError};

/// Outcome of replaying the journal at open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Committed transactions applied.
    pub replayed: usize,
    /// Aborted or incomplete transactions skipped.
    pub discarded: usize,
    /// Highest version named by a replayed transaction.
    pub version: u64,
}

/// Applies every committed transaction in `journal` to `objects` and `tables`.
///
/// A transaction whose commit marker is followed by an abort marker was
/// rolled back after it was prepared and is skipped. Entries left behind by a
/// prepare that failed before its commit marker are dropped when the next
/// begin marker arrives. Tuple changes have set
/// semantics and object entries already present are only verified, so
/// replaying a transaction twice is harmless.
pub(crate) fn replay(journal: &Journal, objects: &ObjectFile, tables: &mut [&mut TupleTable]) -> Result<RecoveryReport> {
    let entries = journal.entries()?.collect::<Result<Vec<_>>>()?;
    let aborted: FxHashSet<u64> = entries
        .iter()
        .filter(|(_, entry)| entry.kind == JournalEntryKind::Abort)
        .map(|(_, entry)| entry.id)
        .collect();

    let mut report = RecoveryReport::default();
    let mut committed = FxHashSet::default();
    let mut run: Vec<&JournalEntry> = Vec::new();
    for (position, entry) in &entries {
        trace!(position, kind = entry.kind.as_str(), file = %entry.file_ref, "journal.replay.entry");
        match entry.kind {
            JournalEntryKind::Commit if aborted.contains(&entry.id) => {
                committed.insert(entry.id);
                report.discarded += 1;
                debug!(txn = entry.id, entries = run.len(), "journal.replay.aborted_after_prepare");
                run.clear();
            }
            JournalEntryKind::Commit => {
                let version = apply_run(&run, objects, tables)?;
                report.version = report.version.max(version);
                report.replayed += 1;
                debug!(txn = entry.id, version, entries = run.len(), "journal.replay.commit");
                run.clear();
            }
            JournalEntryKind::Abort => {
                if !committed.contains(&entry.id) {
                    report.discarded += 1;
                }
                debug!(txn = entry.id, entries = run.len(), "journal.replay.abort");
                run.clear();
            }
            JournalEntryKind::Begin => {
                if !run.is_empty() {
                    warn!(txn = entry.id, orphaned = run.len(), "journal.replay.unterminated_run");
                    report.discarded += 1;
                    run.clear();
                }
            }
            JournalEntryKind::Checkpoint => {}
            JournalEntryKind::Object | JournalEntryKind::Block | JournalEntryKind::Buffer => run.push(entry),
        }
    }
    if !run.is_empty() {
        warn!(entries = run.len(), "journal.replay.incomplete_tail");
        report.discarded += 1;
    }
    if report.replayed > 0 || report.discarded > 0 {
        info!(
            replayed = report.replayed,
            discarded = report.discarded,
            version = report.version,
            "journal.replay"
        );
    }
    Ok(report)
}

fn apply_run(run: &[&JournalEntry], objects: &ObjectFile, tables: &mut [&mut TupleTable]) -> Result<u64> {
    let mut version = 0;
    for entry in run {
        match entry.kind {
            JournalEntryKind::Object => apply_object(entry, objects)?,
            JournalEntryKind::Block => {
                let table = tables
                    .iter_mut()
                    .find(|table| table.name() == entry.file_ref.as_str())
                    .ok_or_else(|| TdbError::InvalidOwned(format!("journal names unknown table {}", entry.file_ref)))?;
                for change in TupleChange::decode_all(&entry.payload)? {
                    table.apply(&change)?;
                }
            }
            JournalEntryKind::Buffer if entry.file_ref.as_str() == STATE_REF => {
                let mut cursor = Cursor::new(&entry.payload);
                version = version.max(cursor.u64_be()?);
            }
            _ => {}
        }
    }
    Ok(version)
}

fn apply_object(entry: &JournalEntry, objects: &ObjectFile) -> Result<()> {
    let corrupt = |reason| TdbError::CorruptionAt {
        file: objects.name().to_owned(),
        offset: entry.id,
        reason,
    };
    if entry.file_ref.as_str() != objects.name() {
        return Err(corrupt("journal object entry names another file"));
    }
    let len = objects.len();
    if entry.id < len {
        if objects.read(entry.id)? != entry.payload {
            return Err(corrupt("journaled object differs from the stored one"));
        }
        return Ok(());
    }
    if entry.id > len {
        return Err(corrupt("journaled object lies beyond the end of the file"));
    }
    let offset = objects.write(&entry.payload)?;
    if offset != entry.id {
        return Err(corrupt("journaled object landed at another offset"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use crate::primitives::journal::FileRef;
    use crate::storage::tuple::Tuple;
    use crate::types::{NodeId, TxnId};
    use std::sync::Arc;

    fn table() -> TupleTable {
        TupleTable::from_labels("triples", &["SPO".to_owned(), "POS".to_owned()]).unwrap()
    }

    fn add(ids: [u64; 3]) -> TupleChange {
        TupleChange::Add(Tuple::from_iter(ids.map(NodeId)))
    }

    #[test]
    fn replays_committed_runs_only() -> Result<()> {
        let journal = Journal::open(Arc::new(MemFileIo::new()))?;
        let objects = ObjectFile::in_memory("nodes.dat");
        let file = FileRef::new("nodes.dat");
        let mut state = 7u64.to_be_bytes().to_vec();
        state.extend_from_slice(&0u64.to_be_bytes());

        journal.write(&JournalEntry::object(file.clone(), 0, b"first".to_vec()))?;
        journal.write(&JournalEntry::block(FileRef::new("triples"), 1, TupleChange::encode_all(&[add([1, 2, 3])])?))?;
        journal.write(&JournalEntry::buffer(FileRef::new(STATE_REF), 1, state))?;
        journal.write(&JournalEntry::commit(TxnId(1)))?;

        journal.write(&JournalEntry::block(FileRef::new("triples"), 2, TupleChange::encode_all(&[add([4, 5, 6])])?))?;
        journal.write(&JournalEntry::abort(TxnId(2)))?;

        journal.write(&JournalEntry::block(FileRef::new("triples"), 3, TupleChange::encode_all(&[add([7, 8, 9])])?))?;

        let mut triples = table();
        let report = replay(&journal, &objects, &mut [&mut triples])?;
        assert_eq!(report, RecoveryReport { replayed: 1, discarded: 2, version: 7 });
        assert_eq!(objects.read(0)?, b"first".to_vec());
        assert_eq!(triples.len(), 1);
        assert!(triples.contains(&[NodeId(1), NodeId(2), NodeId(3)])?);

        // a second pass finds everything already in place
        let again = replay(&journal, &objects, &mut [&mut triples])?;
        assert_eq!(again.replayed, 1);
        assert_eq!(triples.len(), 1);
        assert_eq!(objects.all().count(), 1);
        Ok(())
    }

    #[test]
    fn abort_after_commit_marker_cancels_the_run() -> Result<()> {
        let journal = Journal::open(Arc::new(MemFileIo::new()))?;
        let objects = ObjectFile::in_memory("nodes.dat");
        journal.write(&JournalEntry::object(FileRef::new("nodes.dat"), 0, b"never".to_vec()))?;
        journal.write(&JournalEntry::block(FileRef::new("triples"), 4, TupleChange::encode_all(&[add([1, 1, 1])])?))?;
        journal.write(&JournalEntry::commit(TxnId(4)))?;
        journal.write(&JournalEntry::abort(TxnId(4)))?;

        let mut triples = table();
        let report = replay(&journal, &objects, &mut [&mut triples])?;
        assert_eq!(report, RecoveryReport { replayed: 0, discarded: 1, version: 0 });
        assert!(triples.is_empty());
        assert!(objects.is_empty());
        Ok(())
    }

    #[test]
    fn failed_prepare_does_not_leak_into_the_next_run() -> Result<()> {
        let journal = Journal::open(Arc::new(MemFileIo::new()))?;
        let objects = ObjectFile::in_memory("nodes.dat");
        let file = FileRef::new("nodes.dat");
        let mut state = 1u64.to_be_bytes().to_vec();
        state.extend_from_slice(&0u64.to_be_bytes());

        // txn 1 stopped part way through prepare and never wrote a marker
        journal.write(&JournalEntry::begin(TxnId(1)))?;
        journal.write(&JournalEntry::object(file.clone(), 0, b"orphan".to_vec()))?;
        journal.write(&JournalEntry::block(FileRef::new("triples"), 1, TupleChange::encode_all(&[add([6, 6, 6])])?))?;

        journal.write(&JournalEntry::begin(TxnId(2)))?;
        journal.write(&JournalEntry::object(file, 0, b"kept".to_vec()))?;
        journal.write(&JournalEntry::block(FileRef::new("triples"), 2, TupleChange::encode_all(&[add([1, 2, 3])])?))?;
        journal.write(&JournalEntry::buffer(FileRef::new(STATE_REF), 2, state))?;
        journal.write(&JournalEntry::commit(TxnId(2)))?;

        let mut triples = table();
        let report = replay(&journal, &objects, &mut [&mut triples])?;
        assert_eq!(report, RecoveryReport { replayed: 1, discarded: 1, version: 1 });
        assert_eq!(objects.read(0)?, b"kept".to_vec());
        assert!(!triples.contains(&[NodeId(6), NodeId(6), NodeId(6)])?);
        assert!(triples.contains(&[NodeId(1), NodeId(2), NodeId(3)])?);
        Ok(())
    }

    #[test]
    fn object_past_the_end_is_corruption() -> Result<()> {
        let journal = Journal::open(Arc::new(MemFileIo::new()))?;
        let objects = ObjectFile::in_memory("nodes.dat");
        journal.write(&JournalEntry::object(FileRef::new("nodes.dat"), 64, b"late".to_vec()))?;
        journal.write(&JournalEntry::commit(TxnId(1)))?;
        let err = replay(&journal, &objects, &mut []).unwrap_err();
        assert!(matches!(err, TdbError::CorruptionAt { offset: 64, .. }));
        Ok(())
    }
}
