#![forbid(unsafe_code)]
//! Node tables: the two-way mapping between RDF terms and [`NodeId`]s.
//!
//! The stack used by a store is, from the outside in:
//! [`NodeTableView`] (snapshot bound, read-only) over
//! [`NodeTableInline`] (values packed into the id) over
//! [`NodeTableCache`] (bounded LRU caches) over
//! [`NodeTableNative`] (object file plus hash index).

use std::sync::Arc;

use crate::model::Term;
use crate::types::{NodeId, NodeIdRef, Result};

mod cache;
mod codec;
pub mod inline;
mod native;
mod view;

pub use cache::{CacheMetrics, CacheMetricsSnapshot, CacheSizes, NodeTableCache};
pub use codec::{NodeCodec, MAX_DEPTH};
pub use inline::NodeTableInline;
pub use native::NodeTableNative;
pub use view::NodeTableView;

/// Lazy sequence of stored `(id, term)` pairs.
pub type NodeIter = Box<dyn Iterator<Item = Result<(NodeId, Term)>> + Send>;

/// Shared handle to a node table stack.
pub type SharedNodeTable = Arc<dyn NodeTable>;

/// Term interning table.
pub trait NodeTable: Send + Sync {
    /// Id of `term`, allocating one if the term is new.
    fn get_alloc_node_id(&self, term: &Term) -> Result<NodeId>;

    /// Id of `term` without allocating. The wildcard maps to [`NodeIdRef::Any`],
    /// unknown terms to [`NodeIdRef::Absent`].
    fn get_node_id_for_node(&self, term: &Term) -> Result<NodeIdRef>;

    /// Term stored under `id`, or `None` for ids this table never issued.
    fn get_node_for_node_id(&self, id: NodeId) -> Result<Option<Term>>;

    /// Every stored term in allocation order.
    fn all(&self) -> Result<NodeIter>;

    /// Allocation frontier: non-inline ids below this value may be in use.
    fn limit(&self) -> u64;

    /// Indexes entries appended to the backing object file by someone else.
    /// Returns what was picked up.
    fn refresh(&self) -> Result<Vec<(NodeId, Term)>>;

    /// Makes allocations durable.
    fn sync(&self) -> Result<()>;

    /// Syncs and releases the table.
    fn close(&self) -> Result<()>;
}

impl<T: NodeTable + ?Sized> NodeTable for Arc<T> {
    fn get_alloc_node_id(&self, term: &Term) -> Result<NodeId> {
        (**self).get_alloc_node_id(term)
    }

    fn get_node_id_for_node(&self, term: &Term) -> Result<NodeIdRef> {
        (**self).get_node_id_for_node(term)
    }

    fn get_node_for_node_id(&self, id: NodeId) -> Result<Option<Term>> {
        (**self).get_node_for_node_id(id)
    }

    fn all(&self) -> Result<NodeIter> {
        (**self).all()
    }

    fn limit(&self) -> u64 {
        (**self).limit()
    }

    fn refresh(&self) -> Result<Vec<(NodeId, Term)>> {
        (**self).refresh()
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
