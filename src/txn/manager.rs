#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::transaction::Transaction;
use super::TxnMode;
use crate::primitives::concurrency::{ExclusiveGate, ExclusiveHold, TxnHold, WriterGate, WriterPermit};
use crate::primitives::journal::{Journal, JournalEntry};
use crate::primitives::objectfile::ObjectFile;
use crate::store::StoreView;
use crate::storage::nodes::SharedNodeTable;
use crate::types::{Result, TxnError, TxnId};

/// Commit-time behaviour taken from the store parameters.
///
/// A commit checkpoints when either limit is reached.
#[derive(Debug, Clone, Copy)]
pub struct CommitSettings {
    /// Checkpoint once the journal holds this many bytes.
    pub journal_threshold_bytes: u64,
    /// Checkpoint after this many journaled commits; 0 disables the count.
    pub checkpoint_batch_commits: u64,
    /// Sync the journal at the end of prepare.
    pub sync_on_commit: bool,
}

/// Transaction counters.
#[derive(Default)]
pub struct TxnCounters {
    active_readers: AtomicU64,
    active_writers: AtomicU64,
    finished_readers: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    promoted: AtomicU64,
}

/// Point-in-time copy of [`TxnCounters`].
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TxnCountersSnapshot {
    pub active_readers: u64,
    pub active_writers: u64,
    pub finished_readers: u64,
    pub committed: u64,
    pub aborted: u64,
    pub promoted: u64,
}

impl TxnCounters {
    pub fn snapshot(&self) -> TxnCountersSnapshot {
        TxnCountersSnapshot {
            active_readers: self.active_readers.load(Ordering::Relaxed),
            active_writers: self.active_writers.load(Ordering::Relaxed),
            finished_readers: self.finished_readers.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            promoted: self.promoted.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn started(&self, mode: TxnMode) {
        if mode.is_write() {
            self.active_writers.fetch_add(1, Ordering::Relaxed);
        } else {
            self.active_readers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn promoted(&self) {
        self.active_readers.fetch_sub(1, Ordering::Relaxed);
        self.active_writers.fetch_add(1, Ordering::Relaxed);
        self.promoted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finished(&self, mode: TxnMode, committed: bool) {
        if mode.is_write() {
            self.active_writers.fetch_sub(1, Ordering::Relaxed);
            let counter = if committed { &self.committed } else { &self.aborted };
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.active_readers.fetch_sub(1, Ordering::Relaxed);
            self.finished_readers.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Keeps new writers out while held; readers are unaffected.
///
/// Dropping it, or calling [`enable_writers`](Self::enable_writers), lets
/// writers in again.
pub struct WritersBlocked {
    _permit: WriterPermit,
}

impl WritersBlocked {
    /// Lets writers in again.
    pub fn enable_writers(self) {
        debug!("txn.writers.enabled");
    }
}

/// Sole access to the store: no transaction is running and none can begin
/// while this is held. Ends on drop.
///
/// The holder may checkpoint but must not begin a transaction itself.
pub struct ExclusiveMode {
    _hold: ExclusiveHold,
}

impl ExclusiveMode {
    /// Leaves exclusive mode.
    pub fn finish(self) {
        debug!("txn.exclusive.finish");
    }
}

/// Hands out transactions and owns the shared commit state of a store:
/// the writer gate, the journal, the base node table and the current view.
pub struct TransactionManager {
    gate: WriterGate,
    journal: Journal,
    nodes: SharedNodeTable,
    objects: Arc<ObjectFile>,
    current: RwLock<Arc<StoreView>>,
    next_txn: AtomicU64,
    counters: TxnCounters,
    settings: CommitSettings,
    exclusivity: ExclusiveGate,
    uncheckpointed: AtomicU64,
}

impl TransactionManager {
    pub fn new(
        gate: WriterGate,
        journal: Journal,
        nodes: SharedNodeTable,
        objects: Arc<ObjectFile>,
        initial: StoreView,
        settings: CommitSettings,
    ) -> Self {
        Self {
            gate,
            journal,
            nodes,
            objects,
            current: RwLock::new(Arc::new(initial)),
            next_txn: AtomicU64::new(1),
            counters: TxnCounters::default(),
            settings,
            exclusivity: ExclusiveGate::default(),
            uncheckpointed: AtomicU64::new(0),
        }
    }

    /// Starts a transaction. A writer blocks until no other writer is active;
    /// every mode blocks while the store is in exclusive mode.
    pub fn begin(self: &Arc<Self>, mode: TxnMode, label: Option<String>) -> Result<Transaction> {
        let hold = self.exclusivity.enter();
        let permit = mode.is_write().then(|| self.gate.acquire());
        self.start(mode, label, hold, permit)
    }

    /// Like [`begin`](Self::begin) but fails with [`TxnError::Exclusive`] or
    /// [`TxnError::WriterActive`] instead of waiting.
    pub fn try_begin(self: &Arc<Self>, mode: TxnMode, label: Option<String>) -> Result<Transaction> {
        let hold = self.exclusivity.try_enter().ok_or(TxnError::Exclusive)?;
        let permit = if mode.is_write() {
            Some(self.gate.try_acquire().ok_or(TxnError::WriterActive)?)
        } else {
            None
        };
        self.start(mode, label, hold, permit)
    }

    fn start(
        self: &Arc<Self>,
        mode: TxnMode,
        label: Option<String>,
        hold: TxnHold,
        permit: Option<WriterPermit>,
    ) -> Result<Transaction> {
        let id = TxnId(self.next_txn.fetch_add(1, Ordering::Relaxed));
        let view = self.current_view();
        debug!(%id, %mode, version = view.version(), label = label.as_deref(), "txn.begin");
        Transaction::start(Arc::clone(self), id, mode, label, view, hold, permit)
    }

    /// Waits for the active writer to finish, then keeps writers out until
    /// the returned guard is dropped.
    pub fn block_writers(&self) -> WritersBlocked {
        let permit = self.gate.acquire();
        debug!("txn.writers.blocked");
        WritersBlocked { _permit: permit }
    }

    /// Like [`block_writers`](Self::block_writers) but returns `None` while a
    /// writer is active.
    pub fn try_block_writers(&self) -> Option<WritersBlocked> {
        let permit = self.gate.try_acquire()?;
        debug!("txn.writers.blocked");
        Some(WritersBlocked { _permit: permit })
    }

    /// Waits until no transaction is running and enters exclusive mode.
    ///
    /// Must not be called from a thread that has a transaction open.
    pub fn exclusive(&self) -> ExclusiveMode {
        let hold = self.exclusivity.exclusive();
        info!("txn.exclusive.start");
        ExclusiveMode { _hold: hold }
    }

    /// Enters exclusive mode only if no transaction is running.
    pub fn try_exclusive(&self) -> Option<ExclusiveMode> {
        let hold = self.exclusivity.try_exclusive()?;
        info!("txn.exclusive.start");
        Some(ExclusiveMode { _hold: hold })
    }

    /// View new transactions start from.
    pub fn current_view(&self) -> Arc<StoreView> {
        Arc::clone(&self.current.read())
    }

    /// Version of the current view.
    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    pub fn counters(&self) -> TxnCountersSnapshot {
        self.counters.snapshot()
    }

    pub(crate) fn counters_ref(&self) -> &TxnCounters {
        &self.counters
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Shared base node table.
    pub fn nodes(&self) -> &SharedNodeTable {
        &self.nodes
    }

    /// Base object file of the node table.
    pub fn objects(&self) -> &Arc<ObjectFile> {
        &self.objects
    }

    pub fn settings(&self) -> CommitSettings {
        self.settings
    }

    pub fn gate(&self) -> &WriterGate {
        &self.gate
    }

    pub(crate) fn publish(&self, view: StoreView) {
        let version = view.version();
        *self.current.write() = Arc::new(view);
        debug!(version, "txn.view.publish");
    }

    /// Counts a journaled commit and reports whether the journal is due for
    /// a checkpoint.
    pub(crate) fn commit_journaled(&self) -> bool {
        let commits = self.uncheckpointed.fetch_add(1, Ordering::Relaxed) + 1;
        let batch = self.settings.checkpoint_batch_commits;
        self.journal.len() >= self.settings.journal_threshold_bytes || (batch > 0 && commits >= batch)
    }

    /// Journaled commits since the last checkpoint.
    pub fn uncheckpointed_commits(&self) -> u64 {
        self.uncheckpointed.load(Ordering::Relaxed)
    }

    /// Waits for the writer permit, then checkpoints.
    pub fn checkpoint(&self) -> Result<()> {
        let permit = self.gate.acquire();
        self.checkpoint_locked(&permit)
    }

    /// Writes every index snapshot and the node index at the current version,
    /// syncs the object file and empties the journal.
    pub(crate) fn checkpoint_locked(&self, _permit: &WriterPermit) -> Result<()> {
        let view = self.current_view();
        let version = view.version();
        for table in view.data().tables() {
            table.sync(version)?;
        }
        self.nodes.sync()?;
        let journal_bytes = self.journal.len();
        self.journal.truncate()?;
        self.journal.write(&JournalEntry::checkpoint(version))?;
        self.journal.sync()?;
        let commits = self.uncheckpointed.swap(0, Ordering::Relaxed);
        info!(version, journal_bytes, commits, "txn.checkpoint");
        Ok(())
    }
}
