#![forbid(unsafe_code)]
//! The store: node table stack, triple/quad/prefix tables and the
//! transaction manager over one [`Location`].
//!
//! Files in a directory location:
//!
//! | file            | contents                                   |
//! |-----------------|--------------------------------------------|
//! | `tdb.cfg`       | [`StoreParams`] as JSON                    |
//! | `tdb.lock`      | owner lock, one process per location       |
//! | `nodes.dat`     | encoded terms, addressed by offset         |
//! | `node2id.idx`   | hash index snapshot                        |
//! | `<LABEL>.idx`   | tuple index snapshots, e.g. `SPO.idx`      |
//! | `journal.jrnl`  | transactions since the last checkpoint     |

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::primitives::concurrency::WriterGate;
use crate::primitives::io::Location;
use crate::primitives::journal::Journal;
use crate::storage::nodes::{
    CacheMetricsSnapshot, NodeTable, NodeTableCache, NodeTableInline, NodeTableNative, NodeTableView,
    SharedNodeTable,
};
use crate::storage::tuple::TupleTable;
use crate::txn::{
    CommitSettings, ExclusiveMode, Transaction, TransactionManager, TxnCountersSnapshot, TxnMode, WritersBlocked,
};
use crate::types::Result;

mod dataset;
pub mod params;
pub mod prefixes;
mod recovery;

pub use dataset::{Dataset, QuadIter, TripleIter};
pub use params::StoreParams;
pub use recovery::RecoveryReport;

/// Table holding default-graph triples.
pub const TRIPLE_TABLE: &str = "triples";
/// Table holding named-graph quads.
pub const QUAD_TABLE: &str = "quads";
/// Journal file name.
pub const JOURNAL_FILE: &str = "journal.jrnl";
/// Owner lock file name.
pub const LOCK_FILE: &str = "tdb.lock";
/// Journal file reference of the per-commit state buffer.
pub const STATE_REF: &str = "state";

/// Immutable state of the store as of one commit.
pub struct StoreView {
    version: u64,
    nodes: NodeTableView,
    data: Dataset,
}

impl StoreView {
    /// A view at `version` whose dataset resolves terms through `nodes`.
    pub fn bind(version: u64, nodes: NodeTableView, data: &Dataset) -> Self {
        let shared: SharedNodeTable = Arc::new(nodes.clone());
        Self {
            version,
            data: data.rebind(shared),
            nodes,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nodes(&self) -> &NodeTableView {
        &self.nodes
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }
}

/// An open RDF store.
pub struct Store {
    location: Location,
    params: StoreParams,
    native: Arc<NodeTableNative>,
    cache: Arc<NodeTableCache<Arc<NodeTableNative>>>,
    manager: Arc<TransactionManager>,
    recovery: RecoveryReport,
}

impl Store {
    /// Opens the store at `location`, creating it if empty.
    ///
    /// Committed transactions still in the journal are replayed and then
    /// checkpointed.
    pub fn open(location: Location, params: StoreParams) -> Result<Self> {
        let params = params.resolve(&location)?;
        let gate = match location.file_path(LOCK_FILE) {
            Some(path) => WriterGate::open(path)?,
            None => WriterGate::in_process(),
        };

        let native = Arc::new(NodeTableNative::open(&location)?);
        let cache = Arc::new(NodeTableCache::new(Arc::clone(&native), params.cache_sizes()));
        let nodes: SharedNodeTable = if params.inline_values {
            Arc::new(NodeTableInline::new(Arc::clone(&cache)))
        } else {
            cache.clone()
        };

        let (mut triples, triples_version) = TupleTable::open(TRIPLE_TABLE, &params.triple_indexes, &location)?;
        let (mut quads, quads_version) = TupleTable::open(QUAD_TABLE, &params.quad_indexes, &location)?;
        let (mut prefix_table, prefixes_version) =
            TupleTable::open(prefixes::PREFIX_TABLE, &params.prefix_indexes, &location)?;
        let checkpointed = triples_version.max(quads_version).max(prefixes_version);
        if triples_version != quads_version || quads_version != prefixes_version {
            warn!(
                triples_version,
                quads_version, prefixes_version, "store.open.mixed_checkpoint_versions"
            );
        }

        let journal = Journal::open(location.open_file(JOURNAL_FILE)?)?;
        let report = recovery::replay(
            &journal,
            native.objects(),
            &mut [&mut triples, &mut quads, &mut prefix_table],
        )?;
        nodes.refresh()?;
        let version = checkpointed.max(report.version);

        let view_nodes = NodeTableView::new(Arc::clone(&nodes), native.objects().len());
        let data = Dataset::new(Arc::clone(&nodes), triples, quads, prefix_table);
        let view = StoreView::bind(version, view_nodes, &data);
        let settings = CommitSettings {
            journal_threshold_bytes: params.journal_threshold_bytes,
            checkpoint_batch_commits: params.checkpoint_batch_commits,
            sync_on_commit: params.sync_on_commit,
        };
        let objects = Arc::clone(native.objects());
        let manager = Arc::new(TransactionManager::new(gate, journal, nodes, objects, view, settings));
        if report.replayed > 0 || report.discarded > 0 {
            manager.checkpoint()?;
        }
        info!(
            location = ?location,
            version,
            nodes = native.len(),
            replayed = report.replayed,
            discarded = report.discarded,
            "store.open"
        );
        Ok(Self {
            location,
            params,
            native,
            cache,
            manager,
            recovery: report,
        })
    }

    /// Opens a directory store with default parameters.
    pub fn open_dir(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Location::dir(path)?, StoreParams::default())
    }

    /// A fresh in-memory store with small caches.
    pub fn in_memory() -> Result<Self> {
        Self::open(Location::mem(), StoreParams::small())
    }

    /// Starts a transaction; a writer waits for any other writer to finish.
    pub fn begin(&self, mode: TxnMode) -> Result<Transaction> {
        self.manager.begin(mode, None)
    }

    /// Starts a transaction carrying a label for logs.
    pub fn begin_labelled(&self, mode: TxnMode, label: impl Into<String>) -> Result<Transaction> {
        self.manager.begin(mode, Some(label.into()))
    }

    /// Starts a transaction without waiting; fails if a writer is active or
    /// the store is in exclusive mode.
    pub fn try_begin(&self, mode: TxnMode) -> Result<Transaction> {
        self.manager.try_begin(mode, None)
    }

    /// Waits for the active writer, then keeps writers out until the guard
    /// is dropped. Readers carry on.
    pub fn block_writers(&self) -> WritersBlocked {
        self.manager.block_writers()
    }

    /// Blocks writers only if none is active.
    pub fn try_block_writers(&self) -> Option<WritersBlocked> {
        self.manager.try_block_writers()
    }

    /// Waits for every transaction to finish and holds new ones off until
    /// the guard is dropped.
    pub fn exclusive(&self) -> ExclusiveMode {
        self.manager.exclusive()
    }

    /// Enters exclusive mode only if no transaction is running.
    pub fn try_exclusive(&self) -> Option<ExclusiveMode> {
        self.manager.try_exclusive()
    }

    /// Runs `f` in a read transaction.
    pub fn read<R>(&self, f: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        let txn = self.begin(TxnMode::Read)?;
        let out = f(&txn)?;
        txn.end()?;
        Ok(out)
    }

    /// Runs `f` in a write transaction, committing if it returns `Ok`.
    pub fn write<R>(&self, f: impl FnOnce(&mut Transaction) -> Result<R>) -> Result<R> {
        let mut txn = self.begin(TxnMode::Write)?;
        match f(&mut txn) {
            Ok(out) => {
                txn.commit()?;
                Ok(out)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(txn = %txn.id(), error = %abort_err, "store.write.abort_failed");
                }
                Err(err)
            }
        }
    }

    /// Writes every index snapshot and empties the journal.
    pub fn checkpoint(&self) -> Result<()> {
        self.manager.checkpoint()
    }

    /// Flushes the journal and the node table without checkpointing.
    pub fn sync(&self) -> Result<()> {
        self.manager.journal().sync()?;
        self.manager.nodes().sync()
    }

    /// Checkpoints and releases the store.
    pub fn close(self) -> Result<()> {
        self.manager.checkpoint()?;
        self.manager.nodes().close()?;
        info!(location = ?self.location, version = self.version(), "store.close");
        Ok(())
    }

    /// Version of the latest commit.
    pub fn version(&self) -> u64 {
        self.manager.version()
    }

    pub fn counters(&self) -> TxnCountersSnapshot {
        self.manager.counters()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Effective parameters, after merging with `tdb.cfg`.
    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    pub fn cache_metrics(&self) -> CacheMetricsSnapshot {
        self.cache.metrics()
    }

    /// The view new transactions start from.
    pub fn view(&self) -> Arc<StoreView> {
        self.manager.current_view()
    }

    pub fn journal(&self) -> &Journal {
        self.manager.journal()
    }

    /// Journaled commits since the last checkpoint.
    pub fn uncheckpointed_commits(&self) -> u64 {
        self.manager.uncheckpointed_commits()
    }

    /// Number of terms in the node object file.
    pub fn node_count(&self) -> usize {
        self.native.len()
    }

    /// Bytes in the node object file.
    pub fn node_bytes(&self) -> u64 {
        self.native.objects().len()
    }

    /// What recovery did when the store was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }
}
