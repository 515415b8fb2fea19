#![forbid(unsafe_code)]

use super::{NodeIter, NodeTable, SharedNodeTable};
use crate::model::Term;
use crate::types::{NodeId, NodeIdRef, Result, TxnError};

/// Read-only view of a shared node table as of one commit.
///
/// Terms allocated after the view was taken sit at or beyond `limit` in the
/// object file and are reported as absent.
#[derive(Clone)]
pub struct NodeTableView {
    base: SharedNodeTable,
    limit: u64,
}

impl NodeTableView {
    pub fn new(base: SharedNodeTable, limit: u64) -> Self {
        Self { base, limit }
    }

    pub fn base(&self) -> &SharedNodeTable {
        &self.base
    }

    fn visible(&self, id: NodeId) -> bool {
        id.is_inline() || id.offset() < self.limit
    }
}

impl NodeTable for NodeTableView {
    /// Returns the id of an already visible term; anything else would be a
    /// write and fails with [`TxnError::ReadOnly`].
    fn get_alloc_node_id(&self, term: &Term) -> Result<NodeId> {
        match self.get_node_id_for_node(term)? {
            NodeIdRef::Concrete(id) => Ok(id),
            _ => Err(TxnError::ReadOnly.into()),
        }
    }

    fn get_node_id_for_node(&self, term: &Term) -> Result<NodeIdRef> {
        Ok(match self.base.get_node_id_for_node(term)? {
            NodeIdRef::Concrete(id) if !self.visible(id) => NodeIdRef::Absent,
            other => other,
        })
    }

    fn get_node_for_node_id(&self, id: NodeId) -> Result<Option<Term>> {
        if !self.visible(id) {
            return Ok(None);
        }
        self.base.get_node_for_node_id(id)
    }

    fn all(&self) -> Result<NodeIter> {
        let limit = self.limit;
        let iter = self.base.all()?.take_while(move |entry| match entry {
            Ok((id, _)) => id.offset() < limit,
            Err(_) => true,
        });
        Ok(Box::new(iter))
    }

    fn limit(&self) -> u64 {
        self.limit
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
