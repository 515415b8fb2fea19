#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::manager::TransactionManager;
use super::node_trans::NodeTableTrans;
use super::{TransactionLifecycle, TxnMode, TxnState};
use crate::model::{Quad, Term, Triple};
use crate::primitives::concurrency::{TxnHold, WriterGate, WriterPermit};
use crate::primitives::journal::{FileRef, Journal, JournalEntry};
use crate::store::{Dataset, QuadIter, StoreView, TripleIter, STATE_REF};
use crate::storage::nodes::{NodeTable, NodeTableView, SharedNodeTable};
use crate::storage::tuple::TupleChange;
use crate::types::{NodeId, NodeIdRef, Result, TxnError, TxnId};

struct WriteState {
    permit: Option<WriterPermit>,
    nodes: Arc<NodeTableTrans>,
    data: Dataset,
    /// Version published by enact; `None` when the transaction changed nothing.
    version: Option<u64>,
    journal_started: bool,
}

impl WriteState {
    fn start(manager: &TransactionManager, id: TxnId, view: &StoreView, permit: Option<WriterPermit>) -> Result<Self> {
        let nodes = Arc::new(NodeTableTrans::new(
            Arc::clone(manager.nodes()),
            Arc::clone(manager.objects()),
        ));
        nodes.begin(id)?;
        let shared: SharedNodeTable = nodes.clone();
        let mut data = view.data().rebind(shared);
        for table in data.tables_mut() {
            table.record_changes();
        }
        Ok(Self {
            permit,
            nodes,
            data,
            version: None,
            journal_started: false,
        })
    }

    /// Writes the whole run for `id`: begin marker, objects, tuple blocks,
    /// state buffer and commit marker.
    fn journal_run(&self, journal: &Journal, id: TxnId, version: u64, blocks: Vec<(FileRef, Vec<u8>)>) -> Result<()> {
        journal.write(&JournalEntry::begin(id))?;
        self.nodes.commit_prepare(id, journal)?;
        for (file_ref, payload) in blocks {
            trace!(txn = %id, table = %file_ref, bytes = payload.len(), "txn.commit.block");
            journal.write(&JournalEntry::block(file_ref, id.0, payload))?;
        }
        let mut state = Vec::with_capacity(16);
        state.extend_from_slice(&version.to_be_bytes());
        state.extend_from_slice(&self.nodes.limit().to_be_bytes());
        journal.write(&JournalEntry::buffer(FileRef::new(STATE_REF), id.0, state))?;
        journal.write(&JournalEntry::commit(id))?;
        Ok(())
    }
}

/// A read or write transaction.
///
/// Readers see the [`StoreView`] that was current when they began. A writer
/// sees its own changes on top of that view; nobody else does until enact.
/// Dropping an unfinished write transaction aborts it.
pub struct Transaction {
    manager: Arc<TransactionManager>,
    id: TxnId,
    mode: TxnMode,
    label: Option<String>,
    state: TxnState,
    view: Arc<StoreView>,
    write: Option<WriteState>,
    hold: Option<TxnHold>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn start(
        manager: Arc<TransactionManager>,
        id: TxnId,
        mode: TxnMode,
        label: Option<String>,
        view: Arc<StoreView>,
        hold: TxnHold,
        permit: Option<WriterPermit>,
    ) -> Result<Self> {
        let write = if mode.is_write() {
            Some(WriteState::start(&manager, id, &view, permit)?)
        } else {
            None
        };
        manager.counters_ref().started(mode);
        Ok(Self {
            manager,
            id,
            mode,
            label,
            state: TxnState::Active,
            view,
            write,
            hold: Some(hold),
            finished: false,
        })
    }

    /// Store-wide transaction id, unique within one open store.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current mode; a promoted reader reports [`TxnMode::Write`].
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Label given at begin, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Position in the commit protocol.
    pub fn state(&self) -> TxnState {
        self.state
    }
    /// Version of the view the transaction reads from. A promoted
    /// [`TxnMode::ReadCommittedPromote`] transaction reports the view it moved to.
    pub fn start_version(&self) -> u64 {
        self.view.version()
    }

    fn check(&self, op: &'static str, expected: TxnState) -> Result<()> {
        if self.state != expected {
            return Err(TxnError::BadState {
                op,
                state: self.state.as_str(),
            }
            .into());
        }
        Ok(())
    }

    /// Dataset the transaction reads from.
    pub fn dataset(&self) -> Result<&Dataset> {
        self.check("read", TxnState::Active)?;
        Ok(match &self.write {
            Some(write) => &write.data,
            None => self.view.data(),
        })
    }

    fn dataset_mut(&mut self) -> Result<&mut Dataset> {
        self.check("write", TxnState::Active)?;
        match &mut self.write {
            Some(write) => Ok(&mut write.data),
            None => Err(TxnError::ReadOnly.into()),
        }
    }

    /// Adds a quad; a default-graph quad lands in the triple table. Returns
    /// false if it was already present.
    pub fn add(&mut self, quad: &Quad) -> Result<bool> {
        self.dataset_mut()?.add(quad)
    }

    /// Deletes a quad. Returns false if it was not present.
    pub fn delete(&mut self, quad: &Quad) -> Result<bool> {
        self.dataset_mut()?.delete(quad)
    }

    /// Returns true if the quad is visible to this transaction.
    pub fn contains(&self, quad: &Quad) -> Result<bool> {
        self.dataset()?.contains(quad)
    }

    /// Adds a default-graph triple. Returns false if it was already present.
    pub fn add_triple(&mut self, triple: &Triple) -> Result<bool> {
        self.dataset_mut()?.add_triple(triple)
    }

    /// Deletes a default-graph triple. Returns false if it was not present.
    pub fn delete_triple(&mut self, triple: &Triple) -> Result<bool> {
        self.dataset_mut()?.delete_triple(triple)
    }

    /// Returns true if the default-graph triple is visible to this transaction.
    pub fn contains_triple(&self, triple: &Triple) -> Result<bool> {
        self.dataset()?.contains_triple(triple)
    }

    /// Default-graph triples matching the pattern.
    pub fn find_triples(&self, s: Option<&Term>, p: Option<&Term>, o: Option<&Term>) -> Result<TripleIter<'_>> {
        self.dataset()?.find_triples(s, p, o)
    }

    /// Quads matching the pattern; see [`Dataset::find_quads`].
    pub fn find_quads(
        &self,
        g: Option<&Term>,
        s: Option<&Term>,
        p: Option<&Term>,
        o: Option<&Term>,
    ) -> Result<QuadIter<'_>> {
        self.dataset()?.find_quads(g, s, p, o)
    }

    /// Triples in the default graph.
    pub fn triple_count(&self) -> Result<usize> {
        Ok(self.dataset()?.triple_count())
    }

    /// Quads in named graphs.
    pub fn quad_count(&self) -> Result<usize> {
        Ok(self.dataset()?.quad_count())
    }

    /// Looks a term up without allocating an id.
    pub fn node_id(&self, term: &Term) -> Result<NodeIdRef> {
        self.dataset()?.node_id(term)
    }

    /// Term for `id`, decoding inline values.
    pub fn node(&self, id: NodeId) -> Result<Option<Term>> {
        self.dataset()?.node(id)
    }

    /// Maps `prefix` to `uri` in `graph`, or in the default graph for `None`.
    /// Returns false if the mapping was already there.
    pub fn set_prefix(&mut self, graph: Option<&Term>, prefix: &str, uri: &str) -> Result<bool> {
        self.dataset_mut()?.set_prefix(graph, prefix, uri)
    }

    /// Removes the mapping for `prefix`. Returns false if there was none.
    pub fn remove_prefix(&mut self, graph: Option<&Term>, prefix: &str) -> Result<bool> {
        self.dataset_mut()?.remove_prefix(graph, prefix)
    }

    /// URI mapped to `prefix` in `graph`.
    pub fn prefix(&self, graph: Option<&Term>, prefix: &str) -> Result<Option<String>> {
        self.dataset()?.prefix(graph, prefix)
    }

    /// Every `(prefix, uri)` pair of `graph`, sorted by prefix.
    pub fn prefixes(&self, graph: Option<&Term>) -> Result<Vec<(String, String)>> {
        self.dataset()?.prefixes(graph)
    }

    /// Turns a promotable reader into the writer, waiting for the writer
    /// permit. Returns false when a [`TxnMode::ReadPromote`] transaction
    /// finds that another writer committed since it began; it stays a reader.
    /// A [`TxnMode::ReadCommittedPromote`] transaction moves to the latest
    /// view instead. A writer returns true unchanged.
    pub fn promote(&mut self) -> Result<bool> {
        self.promote_with(|gate| Ok(gate.acquire()))
    }

    /// Like [`promote`](Self::promote) but fails with
    /// [`TxnError::WriterActive`] instead of waiting.
    pub fn try_promote(&mut self) -> Result<bool> {
        self.promote_with(|gate| gate.try_acquire().ok_or_else(|| TxnError::WriterActive.into()))
    }

    fn promote_with(&mut self, acquire: impl FnOnce(&WriterGate) -> Result<WriterPermit>) -> Result<bool> {
        if self.mode.is_write() {
            return Ok(true);
        }
        if !self.mode.is_promotable() {
            return Err(TxnError::NotPromotable {
                mode: self.mode.as_str(),
            }
            .into());
        }
        self.check("promote", TxnState::Active)?;
        let permit = acquire(self.manager.gate())?;
        let current = self.manager.current_view();
        if current.version() != self.view.version() {
            if self.mode == TxnMode::ReadPromote {
                debug!(
                    txn = %self.id,
                    start = self.view.version(),
                    current = current.version(),
                    "txn.promote.stale"
                );
                return Ok(false);
            }
            self.view = current;
        }
        self.write = Some(WriteState::start(&self.manager, self.id, &self.view, Some(permit))?);
        self.manager.counters_ref().promoted();
        debug!(txn = %self.id, from = %self.mode, version = self.view.version(), "txn.promote");
        self.mode = TxnMode::Write;
        Ok(true)
    }

    /// Runs all three commit phases.
    pub fn commit(&mut self) -> Result<()> {
        if self.write.is_none() {
            self.check("commit", TxnState::Active)?;
            self.state = TxnState::Committed;
            self.finish(true);
            return Ok(());
        }
        self.commit_prepare()?;
        self.commit_enact()?;
        self.commit_clearup()
    }

    /// Journals every change and syncs the journal.
    ///
    /// After this returns the transaction survives a crash. If a journal
    /// write fails the transaction moves to [`TxnState::Failed`] and can only
    /// be aborted.
    pub fn commit_prepare(&mut self) -> Result<()> {
        self.check("prepare", TxnState::Active)?;
        let id = self.id;
        let manager = Arc::clone(&self.manager);
        let version = self.view.version() + 1;
        let Some(write) = self.write.as_mut() else {
            return Err(TxnError::ReadOnly.into());
        };

        let mut blocks = Vec::new();
        for table in write.data.tables() {
            let changes = table.changes();
            if !changes.is_empty() {
                trace!(txn = %id, table = table.name(), changes = changes.len(), "txn.commit.changes");
                blocks.push((FileRef::new(table.name()), TupleChange::encode_all(changes)?));
            }
        }
        if blocks.is_empty() && write.nodes.pending() == 0 {
            debug!(txn = %id, "txn.commit.empty");
            self.state = TxnState::Prepared;
            return Ok(());
        }

        let tables = blocks.len();
        write.journal_started = true;
        let mut journaled = write.journal_run(manager.journal(), id, version, blocks);
        if journaled.is_ok() && manager.settings().sync_on_commit {
            journaled = manager.journal().sync();
        }
        if let Err(err) = journaled {
            warn!(txn = %id, error = %err, "txn.commit.prepare_failed");
            self.state = TxnState::Failed;
            return Err(err);
        }
        for table in write.data.tables_mut() {
            table.clear_changes();
        }
        write.version = Some(version);
        self.state = TxnState::Prepared;
        debug!(txn = %id, version, tables, "txn.commit.prepare");
        Ok(())
    }

    /// Applies the changes to the shared node table and publishes the new view.
    pub fn commit_enact(&mut self) -> Result<()> {
        self.check("enact", TxnState::Prepared)?;
        let id = self.id;
        let Some(write) = self.write.as_mut() else {
            return Err(TxnError::ReadOnly.into());
        };
        if let Some(version) = write.version {
            write.nodes.commit_enact(id)?;
            let nodes = NodeTableView::new(Arc::clone(self.manager.nodes()), self.manager.objects().len());
            self.manager.publish(StoreView::bind(version, nodes, &write.data));
            debug!(txn = %id, version, "txn.commit.enact");
        }
        self.state = TxnState::Enacted;
        Ok(())
    }

    /// Drops transaction-local state, checkpoints when the journal is due
    /// and releases the writer permit.
    pub fn commit_clearup(&mut self) -> Result<()> {
        self.check("clearup", TxnState::Enacted)?;
        let id = self.id;
        let Some(write) = self.write.as_mut() else {
            return Err(TxnError::ReadOnly.into());
        };
        write.nodes.commit_clearup(id)?;
        let permit = write.permit.take();
        let journaled = write.version.is_some();
        self.state = TxnState::Committed;
        self.finish(true);

        let mut outcome = Ok(());
        if let Some(permit) = &permit {
            if journaled && self.manager.commit_journaled() {
                outcome = self.manager.checkpoint_locked(permit);
            }
        }
        drop(permit);
        debug!(txn = %id, "txn.commit.clearup");
        outcome
    }

    /// Rolls the transaction back. A transaction that started journaling
    /// leaves an abort marker in the journal.
    pub fn abort(&mut self) -> Result<()> {
        if !matches!(self.state, TxnState::Active | TxnState::Prepared | TxnState::Failed) {
            return Err(TxnError::BadState {
                op: "abort",
                state: self.state.as_str(),
            }
            .into());
        }
        let id = self.id;
        let mut outcome = Ok(());
        if let Some(write) = self.write.as_mut() {
            outcome = write.nodes.abort(id);
            if write.journal_started {
                let journal = self.manager.journal();
                outcome = outcome
                    .and_then(|()| journal.write(&JournalEntry::abort(id)).map(|_| ()))
                    .and_then(|()| journal.sync());
                info!(txn = %id, "txn.abort.journaled");
            }
            for table in write.data.tables_mut() {
                table.clear_changes();
            }
            write.permit = None;
        }
        self.state = TxnState::Aborted;
        self.finish(false);
        debug!(txn = %id, mode = %self.mode, "txn.abort");
        outcome
    }

    /// Finishes the transaction: a reader commits, an unfinished writer aborts.
    pub fn end(mut self) -> Result<()> {
        match self.state {
            TxnState::Active if !self.mode.is_write() => self.commit(),
            TxnState::Active | TxnState::Prepared | TxnState::Failed => self.abort(),
            TxnState::Enacted => self.commit_clearup(),
            TxnState::Committed | TxnState::Aborted => Ok(()),
        }
    }

    fn finish(&mut self, committed: bool) {
        if !self.finished {
            self.finished = true;
            self.hold = None;
            self.manager.counters_ref().finished(self.mode, committed);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome = match self.state {
            _ if !self.mode.is_write() => {
                self.finish(true);
                Ok(())
            }
            TxnState::Enacted => self.commit_clearup(),
            _ => {
                warn!(txn = %self.id, state = %self.state, "txn.drop.active_writer");
                self.abort()
            }
        };
        if let Err(err) = outcome {
            warn!(txn = %self.id, error = %err, "txn.drop.failed");
        }
    }
}
