#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, trace};

use super::object_trans::ObjectFileTrans;
use super::TransactionLifecycle;
use crate::model::Term;
use crate::primitives::journal::Journal;
use crate::primitives::objectfile::ObjectFile;
use crate::storage::nodes::{NodeCodec, NodeIter, NodeTable, SharedNodeTable};
use crate::types::{NodeId, NodeIdRef, Result, TxnId};

#[derive(Default)]
struct Overlay {
    node_to_id: FxHashMap<Term, NodeId>,
    id_to_node: FxHashMap<NodeId, Term>,
}

impl Overlay {
    fn clear(&mut self) {
        self.node_to_id.clear();
        self.id_to_node.clear();
    }
}

/// Node table seen by a write transaction.
///
/// Lookups fall through to the shared base table; new terms are allocated in
/// a private overlay backed by an [`ObjectFileTrans`], so their ids are the
/// offsets they will occupy in the base object file after enact.
pub struct NodeTableTrans {
    base: SharedNodeTable,
    objects: ObjectFileTrans,
    overlay: Mutex<Overlay>,
}

impl NodeTableTrans {
    /// Wraps `base`, whose terms live in `base_objects`.
    pub fn new(base: SharedNodeTable, base_objects: Arc<ObjectFile>) -> Self {
        Self {
            base,
            objects: ObjectFileTrans::new(base_objects),
            overlay: Mutex::new(Overlay::default()),
        }
    }

    /// Number of terms allocated by the current transaction.
    pub fn pending(&self) -> usize {
        self.overlay.lock().node_to_id.len()
    }

    fn in_overlay(&self, id: NodeId) -> bool {
        !id.is_inline() && id.offset() >= self.objects.base_len()
    }
}

impl NodeTable for NodeTableTrans {
    fn get_alloc_node_id(&self, term: &Term) -> Result<NodeId> {
        let mut overlay = self.overlay.lock();
        if let Some(id) = overlay.node_to_id.get(term) {
            return Ok(*id);
        }
        if let NodeIdRef::Concrete(id) = self.base.get_node_id_for_node(term)? {
            return Ok(id);
        }
        let encoded = NodeCodec::encode(term)?;
        let id = NodeId::from_offset(self.objects.write(&encoded)?);
        overlay.node_to_id.insert(term.clone(), id);
        overlay.id_to_node.insert(id, term.clone());
        trace!(%id, "node_trans.alloc");
        Ok(id)
    }

    fn get_node_id_for_node(&self, term: &Term) -> Result<NodeIdRef> {
        if let Some(id) = self.overlay.lock().node_to_id.get(term) {
            return Ok(NodeIdRef::Concrete(*id));
        }
        self.base.get_node_id_for_node(term)
    }

    fn get_node_for_node_id(&self, id: NodeId) -> Result<Option<Term>> {
        if self.in_overlay(id) {
            return Ok(self.overlay.lock().id_to_node.get(&id).cloned());
        }
        self.base.get_node_for_node_id(id)
    }

    fn all(&self) -> Result<NodeIter> {
        let base_len = self.objects.base_len();
        let mut pending: Vec<(NodeId, Term)> = self
            .overlay
            .lock()
            .id_to_node
            .iter()
            .map(|(id, term)| (*id, term.clone()))
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        let committed = self.base.all()?.take_while(move |entry| match entry {
            Ok((id, _)) => id.offset() < base_len,
            Err(_) => true,
        });
        Ok(Box::new(committed.chain(pending.into_iter().map(Ok))))
    }

    fn limit(&self) -> u64 {
        self.objects.len()
    }

    fn refresh(&self) -> Result<Vec<(NodeId, Term)>> {
        Ok(Vec::new())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl TransactionLifecycle for NodeTableTrans {
    fn begin(&self, txn: TxnId) -> Result<()> {
        self.overlay.lock().clear();
        self.objects.begin(txn)
    }

    fn commit_prepare(&self, txn: TxnId, journal: &Journal) -> Result<()> {
        self.objects.commit_prepare(txn, journal)
    }

    /// Appends the overlay's objects to the base file and has the base table
    /// index them; the base must pick up exactly the overlay's terms.
    fn commit_enact(&self, txn: TxnId) -> Result<()> {
        self.objects.commit_enact(txn)?;
        let mut indexed = self.base.refresh()?;
        let overlay = self.overlay.lock();
        let mut expected: Vec<(NodeId, Term)> = overlay
            .id_to_node
            .iter()
            .map(|(id, term)| (*id, term.clone()))
            .collect();
        indexed.sort_by_key(|(id, _)| *id);
        expected.sort_by_key(|(id, _)| *id);
        if indexed != expected {
            error!(
                %txn,
                indexed = indexed.len(),
                expected = expected.len(),
                "node_trans.enact.index_mismatch"
            );
            panic!("base node table indexed different terms than the transaction allocated");
        }
        debug!(%txn, nodes = expected.len(), "node_trans.enact");
        Ok(())
    }

    fn commit_clearup(&self, txn: TxnId) -> Result<()> {
        self.overlay.lock().clear();
        self.objects.commit_clearup(txn)
    }

    fn abort(&self, txn: TxnId) -> Result<()> {
        let dropped = {
            let mut overlay = self.overlay.lock();
            let dropped = overlay.node_to_id.len();
            overlay.clear();
            dropped
        };
        trace!(%txn, dropped, "node_trans.abort");
        self.objects.abort(txn)
    }
}
