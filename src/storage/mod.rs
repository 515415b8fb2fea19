//! Storage core: node interning and multi-index tuple tables.
//!
//! Terms are interned to [`NodeId`](crate::types::NodeId)s by a node table;
//! tuples of ids are kept in several sorted indexes, one per column order.

/// Column permutations between natural and index order.
pub mod colmap;

/// Sorted record indexes and their snapshot files.
pub mod index;

/// Term-addressed tuple tables.
pub mod node_tuple;

/// Term to id mapping: codec, native table, cache, inline values, views.
pub mod nodes;

/// Fixed-length index records.
pub mod record;

/// Tuple indexes and tuple tables.
pub mod tuple;

pub use colmap::ColumnMap;
pub use index::{IndexFile, RecordIndex, RecordScan};
pub use node_tuple::{NodeTupleScan, NodeTupleTable};
pub use nodes::{
    NodeCodec, NodeTable, NodeTableCache, NodeTableInline, NodeTableNative, NodeTableView,
    SharedNodeTable,
};
pub use record::{Record, RecordFactory};
pub use tuple::{Tuple, TupleChange, TupleIndex, TupleScan, TupleTable};
