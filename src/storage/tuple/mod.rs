#![forbid(unsafe_code)]
//! Tuple indexes and multi-index tuple tables.
//!
//! A [`TupleTable`] stores fixed-arity tuples of node ids in several
//! [`TupleIndex`]es, each sorting the same tuples in a different column
//! order. Index 0 is the primary; it decides whether an add or delete changes
//! anything and the secondaries must agree.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::primitives::bytes::buf::Cursor;
use crate::primitives::io::Location;
use crate::storage::colmap::ColumnMap;
use crate::storage::index::{IndexFile, RecordIndex, RecordScan};
use crate::storage::record::RecordFactory;
use crate::types::{NodeId, Result, TdbError};

/// A tuple of node ids in natural column order.
pub type Tuple = SmallVec<[NodeId; 4]>;

/// A change to a tuple table, as recorded for the journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TupleChange {
    /// The tuple was added.
    Add(Tuple),
    /// The tuple was deleted.
    Delete(Tuple),
}

const CHANGE_ADD: u8 = 1;
const CHANGE_DELETE: u8 = 2;

impl TupleChange {
    /// Serializes a batch of changes: `[op u8][arity u8][ids u64 BE...]` per change.
    ///
    /// Fails with [`TdbError::Arity`] for a tuple longer than 255 columns.
    pub fn encode_all(changes: &[TupleChange]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for change in changes {
            let (op, tuple) = match change {
                TupleChange::Add(t) => (CHANGE_ADD, t),
                TupleChange::Delete(t) => (CHANGE_DELETE, t),
            };
            let arity = u8::try_from(tuple.len()).map_err(|_| TdbError::Arity {
                expected: usize::from(u8::MAX),
                actual: tuple.len(),
            })?;
            out.push(op);
            out.push(arity);
            for id in tuple {
                out.extend_from_slice(&id.to_be_bytes());
            }
        }
        Ok(out)
    }

    /// Parses bytes written by [`TupleChange::encode_all`].
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<TupleChange>> {
        let mut cur = Cursor::new(bytes);
        let mut changes = Vec::new();
        while cur.remaining() > 0 {
            let op = cur.u8()?;
            let arity = usize::from(cur.u8()?);
            let mut tuple = Tuple::with_capacity(arity);
            for _ in 0..arity {
                tuple.push(NodeId(cur.u64_be()?));
            }
            changes.push(match op {
                CHANGE_ADD => TupleChange::Add(tuple),
                CHANGE_DELETE => TupleChange::Delete(tuple),
                _ => return Err(TdbError::Corruption("unknown tuple change op")),
            });
        }
        Ok(changes)
    }
}

/// One sort order over a table's tuples.
#[derive(Clone)]
pub struct TupleIndex {
    colmap: Arc<ColumnMap>,
    records: RecordIndex,
    file: Option<IndexFile>,
}

impl TupleIndex {
    /// An empty in-memory index; `label` names its column order relative to `primary`.
    pub fn new(primary: &str, label: &str) -> Result<Self> {
        let colmap = ColumnMap::from_labels(primary, label)?;
        let factory = RecordFactory::for_tuples(colmap.len());
        Ok(Self {
            colmap: Arc::new(colmap),
            records: RecordIndex::new(factory),
            file: None,
        })
    }

    /// Opens an index backed by `<label>.idx` at `location`.
    ///
    /// Returns the index and the version recorded in its snapshot, if one exists.
    pub fn open(primary: &str, label: &str, location: &Location) -> Result<(Self, Option<u64>)> {
        let mut index = Self::new(primary, label)?;
        let file = IndexFile::new(location.clone(), label);
        let version = match file.load(index.records.factory())? {
            Some((version, records)) => {
                index.records = records;
                Some(version)
            }
            None => None,
        };
        index.file = Some(file);
        Ok((index, version))
    }

    /// Index label, e.g. `"POS"`.
    pub fn name(&self) -> &str {
        self.colmap.label()
    }

    /// Number of columns.
    pub fn arity(&self) -> usize {
        self.colmap.len()
    }

    /// Column mapping of this index.
    pub fn colmap(&self) -> &ColumnMap {
        &self.colmap
    }

    /// Adds a natural-order tuple. Returns true if it was not already present.
    pub fn add(&mut self, tuple: &[NodeId]) -> Result<bool> {
        let record = self.record_for(tuple)?;
        self.records.insert(record)
    }

    /// Deletes a natural-order tuple. Returns true if it was present.
    pub fn delete(&mut self, tuple: &[NodeId]) -> Result<bool> {
        let record = self.record_for(tuple)?;
        Ok(self.records.delete(record.key()))
    }

    /// Returns true if the tuple is present.
    pub fn contains(&self, tuple: &[NodeId]) -> Result<bool> {
        let record = self.record_for(tuple)?;
        Ok(self.records.contains(record.key()))
    }

    /// Number of leading native slots bound in `pattern`.
    pub fn weight(&self, pattern: &[Option<NodeId>]) -> Result<usize> {
        let native = self.colmap.map(pattern)?;
        Ok(native.iter().take_while(|slot| slot.is_some()).count())
    }

    /// Tuples matching a natural-order pattern (`None` = any), lazily.
    ///
    /// Scans the range covered by the bound prefix in this index's order and
    /// filters on any slots bound after the first wildcard.
    pub fn find(&self, pattern: &[Option<NodeId>]) -> Result<TupleScan> {
        let native = self.colmap.map(pattern)?;
        let mut prefix = Vec::with_capacity(native.len() * NodeId::SIZE);
        for id in native.iter().map_while(|slot| *slot) {
            prefix.extend_from_slice(&id.to_be_bytes());
        }
        let prefix_len = prefix.len() / NodeId::SIZE;
        let needs_filter = native[prefix_len..].iter().any(Option::is_some);
        trace!(index = self.name(), prefix_len, needs_filter, "tuple_index.find");
        Ok(TupleScan {
            scan: self.records.prefix_scan(&prefix),
            colmap: Arc::clone(&self.colmap),
            filter: needs_filter.then_some(native),
        })
    }

    /// Every tuple, in this index's order.
    pub fn all(&self) -> TupleScan {
        TupleScan {
            scan: self.records.prefix_scan(&[]),
            colmap: Arc::clone(&self.colmap),
            filter: None,
        }
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the index holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes the index snapshot if the index is file-backed.
    pub fn sync(&self, version: u64) -> Result<()> {
        if let Some(file) = &self.file {
            file.store(version, &self.records)?;
        }
        Ok(())
    }

    fn record_for(&self, tuple: &[NodeId]) -> Result<crate::storage::record::Record> {
        let native = self.colmap.map(tuple)?;
        self.records.factory().create_from_ids(&native)
    }

    fn rebuild_from(&mut self, source: &TupleIndex) -> Result<()> {
        let mut records = RecordIndex::new(self.records.factory());
        for tuple in source.all() {
            let native = self.colmap.map(&tuple)?;
            records.insert(records.factory().create_from_ids(&native)?)?;
        }
        self.records = records;
        Ok(())
    }
}

/// Lazy iterator over matching tuples in natural order.
pub struct TupleScan {
    scan: RecordScan,
    colmap: Arc<ColumnMap>,
    filter: Option<SmallVec<[Option<NodeId>; 4]>>,
}

impl Iterator for TupleScan {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        for record in self.scan.by_ref() {
            let native: Tuple = record.key_ids().collect();
            if let Some(filter) = &self.filter {
                let matches = filter
                    .iter()
                    .zip(&native)
                    .all(|(want, have)| want.map_or(true, |w| w == *have));
                if !matches {
                    continue;
                }
            }
            return Some(
                (0..self.colmap.len())
                    .map(|col| native[self.colmap.map_slot(col)])
                    .collect(),
            );
        }
        None
    }
}

/// A set of tuples kept in several indexes.
#[derive(Clone)]
pub struct TupleTable {
    name: Arc<str>,
    indexes: Vec<TupleIndex>,
    changes: Option<Vec<TupleChange>>,
}

impl TupleTable {
    /// Builds a table over existing indexes; index 0 is the primary.
    pub fn new(name: impl Into<Arc<str>>, indexes: Vec<TupleIndex>) -> Result<Self> {
        let Some(primary) = indexes.first() else {
            return Err(TdbError::Invalid("tuple table needs at least one index"));
        };
        let arity = primary.arity();
        if let Some(bad) = indexes.iter().find(|index| index.arity() != arity) {
            return Err(TdbError::Arity {
                expected: arity,
                actual: bad.arity(),
            });
        }
        Ok(Self {
            name: name.into(),
            indexes,
            changes: None,
        })
    }

    /// In-memory table from index labels; the first label is the primary order.
    pub fn from_labels(name: impl Into<Arc<str>>, labels: &[String]) -> Result<Self> {
        let primary = labels
            .first()
            .ok_or(TdbError::Invalid("tuple table needs at least one index"))?;
        let indexes = labels
            .iter()
            .map(|label| TupleIndex::new(primary, label))
            .collect::<Result<Vec<_>>>()?;
        Self::new(name, indexes)
    }

    /// File-backed table at `location`. Returns the table and its checkpoint version.
    ///
    /// A secondary whose snapshot is missing or from another version than the
    /// primary's is rebuilt from the primary.
    pub fn open(name: impl Into<Arc<str>>, labels: &[String], location: &Location) -> Result<(Self, u64)> {
        let name = name.into();
        let primary_label = labels
            .first()
            .ok_or(TdbError::Invalid("tuple table needs at least one index"))?;
        let mut indexes = Vec::with_capacity(labels.len());
        let mut primary_version = None;
        for (pos, label) in labels.iter().enumerate() {
            let (mut index, version) = TupleIndex::open(primary_label, label, location)?;
            if pos == 0 {
                primary_version = version;
            } else if version != primary_version {
                warn!(table = %name, index = label.as_str(), ?version, ?primary_version, "tuple_table.open.rebuild");
                index.rebuild_from(&indexes[0])?;
            }
            indexes.push(index);
        }
        let version = primary_version.unwrap_or(0);
        debug!(table = %name, version, tuples = indexes[0].len(), "tuple_table.open");
        Ok((Self::new(name, indexes)?, version))
    }

    /// Table name, used as the journal file reference.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tuple arity.
    pub fn arity(&self) -> usize {
        self.indexes[0].arity()
    }

    /// All indexes; index 0 is the primary.
    pub fn indexes(&self) -> &[TupleIndex] {
        &self.indexes
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.indexes[0].len()
    }

    /// Returns true if the table holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.indexes[0].is_empty()
    }

    /// Starts recording changes for the journal.
    pub fn record_changes(&mut self) {
        self.changes.get_or_insert_with(Vec::new);
    }

    /// Changes recorded since recording started or was last cleared.
    pub fn changes(&self) -> &[TupleChange] {
        self.changes.as_deref().unwrap_or_default()
    }

    /// Forgets the recorded changes. Recording, if on, stays on.
    pub fn clear_changes(&mut self) {
        if let Some(changes) = &mut self.changes {
            changes.clear();
        }
    }

    /// Adds a tuple to every index. Returns true if it was new.
    pub fn add(&mut self, tuple: &[NodeId]) -> Result<bool> {
        if !self.indexes[0].add(tuple)? {
            return Ok(false);
        }
        for index in &mut self.indexes[1..] {
            if !index.add(tuple)? {
                error!(table = %self.name, index = index.name(), ?tuple, "tuple_table.add.secondary_mismatch");
                panic!("secondary index {} already held a tuple missing from the primary", index.name());
            }
        }
        if let Some(changes) = &mut self.changes {
            changes.push(TupleChange::Add(Tuple::from_slice(tuple)));
        }
        Ok(true)
    }

    /// Deletes a tuple from every index. Returns true if it was present.
    pub fn delete(&mut self, tuple: &[NodeId]) -> Result<bool> {
        if !self.indexes[0].delete(tuple)? {
            return Ok(false);
        }
        for index in &mut self.indexes[1..] {
            if !index.delete(tuple)? {
                error!(table = %self.name, index = index.name(), ?tuple, "tuple_table.delete.secondary_mismatch");
                panic!("secondary index {} lacked a tuple held by the primary", index.name());
            }
        }
        if let Some(changes) = &mut self.changes {
            changes.push(TupleChange::Delete(Tuple::from_slice(tuple)));
        }
        Ok(true)
    }

    /// Applies a journaled change.
    pub fn apply(&mut self, change: &TupleChange) -> Result<bool> {
        match change {
            TupleChange::Add(tuple) => self.add(tuple),
            TupleChange::Delete(tuple) => self.delete(tuple),
        }
    }

    /// Returns true if the tuple is present.
    pub fn contains(&self, tuple: &[NodeId]) -> Result<bool> {
        self.indexes[0].contains(tuple)
    }

    /// Position of the index `find` would use for `pattern`.
    ///
    /// The index with the longest bound prefix wins; ties go to the earliest
    /// index. With nothing bound the primary is used.
    pub fn choose_index(&self, pattern: &[Option<NodeId>]) -> Result<usize> {
        let mut best = 0;
        let mut best_weight = 0;
        for (pos, index) in self.indexes.iter().enumerate() {
            let weight = index.weight(pattern)?;
            if weight > best_weight {
                best = pos;
                best_weight = weight;
            }
        }
        Ok(best)
    }

    /// Tuples matching `pattern` (`None` = any), in natural order.
    pub fn find(&self, pattern: &[Option<NodeId>]) -> Result<TupleScan> {
        let chosen = self.choose_index(pattern)?;
        trace!(table = %self.name, index = self.indexes[chosen].name(), "tuple_table.find");
        self.indexes[chosen].find(pattern)
    }

    /// Every tuple, in primary order.
    pub fn all(&self) -> TupleScan {
        self.indexes[0].all()
    }

    /// Writes every file-backed index snapshot under `version`.
    pub fn sync(&self, version: u64) -> Result<()> {
        for index in &self.indexes {
            index.sync(version)?;
        }
        Ok(())
    }

    /// Final sync before the table is dropped.
    pub fn close(&self, version: u64) -> Result<()> {
        self.sync(version)
    }
}
