#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::TransactionLifecycle;
use crate::primitives::journal::{FileRef, Journal, JournalEntry};
use crate::primitives::objectfile::ObjectFile;
use crate::types::{Result, TdbError, TxnId};

struct Scratch {
    /// Length of the base file when the transaction began.
    base_len: u64,
    txn: Option<TxnId>,
}

/// Transactional front of an object file.
///
/// Writes go to an in-memory scratch file whose offsets continue from the
/// base length at begin, so every id handed out is the offset the object will
/// have once enacted. Reads below the base length go to the base file.
pub struct ObjectFileTrans {
    base: Arc<ObjectFile>,
    scratch: ObjectFile,
    state: Mutex<Scratch>,
}

impl ObjectFileTrans {
    pub fn new(base: Arc<ObjectFile>) -> Self {
        let base_len = base.len();
        let scratch = ObjectFile::in_memory(format!("{}~scratch", base.name()));
        Self {
            base,
            scratch,
            state: Mutex::new(Scratch { base_len, txn: None }),
        }
    }

    /// Journal reference of the base file.
    pub fn file_ref(&self) -> FileRef {
        FileRef::new(self.base.name())
    }

    /// Base length pinned at begin.
    pub fn base_len(&self) -> u64 {
        self.state.lock().base_len
    }

    /// Appends to the scratch file; returns the final offset.
    pub fn write(&self, bytes: &[u8]) -> Result<u64> {
        let state = self.state.lock();
        if state.txn.is_none() {
            return Err(TdbError::Invalid("object write outside a transaction"));
        }
        Ok(state.base_len + self.scratch.write(bytes)?)
    }

    /// Reads an object from the base file or the scratch file.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>> {
        let base_len = self.base_len();
        if offset < base_len {
            return self.base.read(offset);
        }
        self.scratch.read(offset - base_len).map_err(|err| match err {
            TdbError::ObjectNotFound { .. } => TdbError::ObjectNotFound {
                file: self.base.name().to_owned(),
                offset,
            },
            other => other,
        })
    }

    /// Offset the next write will return.
    pub fn len(&self) -> u64 {
        self.base_len() + self.scratch.len()
    }

    /// Returns true if neither file holds anything.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Objects written in this transaction with their final offsets.
    pub fn pending(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        let base_len = self.base_len();
        self.scratch
            .all()
            .map(|entry| entry.map(|(offset, bytes)| (base_len + offset, bytes)))
            .collect()
    }

    fn reset(&self) -> Result<()> {
        self.scratch.truncate_to(0)
    }
}

impl TransactionLifecycle for ObjectFileTrans {
    fn begin(&self, txn: TxnId) -> Result<()> {
        self.reset()?;
        let mut state = self.state.lock();
        state.base_len = self.base.len();
        state.txn = Some(txn);
        trace!(%txn, base_len = state.base_len, "object_trans.begin");
        Ok(())
    }

    fn commit_prepare(&self, txn: TxnId, journal: &Journal) -> Result<()> {
        let file_ref = self.file_ref();
        let pending = self.pending()?;
        for (offset, bytes) in &pending {
            journal.write(&JournalEntry::object(file_ref.clone(), *offset, bytes.clone()))?;
        }
        debug!(%txn, objects = pending.len(), "object_trans.prepare");
        Ok(())
    }

    fn commit_enact(&self, txn: TxnId) -> Result<()> {
        let base_len = self.base_len();
        if self.base.len() != base_len {
            return Err(TdbError::CorruptionAt {
                file: self.base.name().to_owned(),
                offset: self.base.len(),
                reason: "object file grew during the transaction",
            });
        }
        let pending = self.pending()?;
        for (expected, bytes) in &pending {
            let offset = self.base.write(bytes)?;
            if offset != *expected {
                error!(%txn, offset, expected, "object_trans.enact.offset_mismatch");
                panic!("object enacted at {offset}, allocated as {expected}");
            }
        }
        debug!(%txn, objects = pending.len(), "object_trans.enact");
        Ok(())
    }

    fn commit_clearup(&self, _txn: TxnId) -> Result<()> {
        self.reset()?;
        let mut state = self.state.lock();
        state.base_len = self.base.len();
        state.txn = None;
        Ok(())
    }

    fn abort(&self, txn: TxnId) -> Result<()> {
        self.reset()?;
        self.state.lock().txn = None;
        trace!(%txn, "object_trans.abort");
        Ok(())
    }
}
