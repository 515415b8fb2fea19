#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use xxhash_rust::xxh3::xxh3_128;

use super::{NodeCodec, NodeIter, NodeTable};
use crate::model::Term;
use crate::primitives::io::Location;
use crate::primitives::objectfile::ObjectFile;
use crate::storage::index::{IndexFile, RecordIndex};
use crate::storage::record::RecordFactory;
use crate::types::{NodeId, NodeIdRef, Result, TdbError};

/// Object file holding encoded terms.
pub const NODES_FILE: &str = "nodes.dat";
/// Snapshot name of the hash index (`node2id.idx`).
pub const NODE_INDEX: &str = "node2id";

const HASH_LEN: usize = 16;

struct NativeState {
    /// xxh3-128 of the encoded term -> object offset.
    index: RecordIndex,
    /// Object-file length covered by `index`.
    indexed_to: u64,
}

/// Node table over an append-only object file and a hash index.
///
/// Ids are object-file offsets. Lookup and conditional insert run under one
/// mutex, so two threads allocating the same new term get the same id.
pub struct NodeTableNative {
    objects: Arc<ObjectFile>,
    state: Mutex<NativeState>,
    index_file: Option<IndexFile>,
}

fn index_factory() -> RecordFactory {
    RecordFactory::new(HASH_LEN, NodeId::SIZE)
}

fn hash_key(encoded: &[u8]) -> [u8; HASH_LEN] {
    xxh3_128(encoded).to_be_bytes()
}

impl NodeTableNative {
    /// In-memory table for tests and scratch stores.
    pub fn in_memory() -> Self {
        Self {
            objects: Arc::new(ObjectFile::in_memory(NODES_FILE)),
            state: Mutex::new(NativeState {
                index: RecordIndex::new(index_factory()),
                indexed_to: 0,
            }),
            index_file: None,
        }
    }

    /// Opens `nodes.dat` and `node2id.idx` at `location`.
    ///
    /// The hash index is loaded from its snapshot and then catches up with
    /// entries written after the snapshot. A torn final entry is cut off.
    pub fn open(location: &Location) -> Result<Self> {
        let objects = Arc::new(ObjectFile::open(location.open_file(NODES_FILE)?, NODES_FILE)?);
        let index_file = IndexFile::new(location.clone(), NODE_INDEX);
        let (indexed_to, index) = match index_file.load(index_factory())? {
            Some((covered, index)) if covered <= objects.len() => (covered, index),
            Some((covered, _)) => {
                return Err(TdbError::CorruptionAt {
                    file: NODES_FILE.to_owned(),
                    offset: covered,
                    reason: "node index covers more than the object file holds",
                })
            }
            None => (0, RecordIndex::new(index_factory())),
        };
        let table = Self {
            objects,
            state: Mutex::new(NativeState { index, indexed_to }),
            index_file: Some(index_file),
        };
        let caught_up = table.catch_up(true)?;
        info!(
            file = NODES_FILE,
            snapshot_covers = indexed_to,
            caught_up = caught_up.len(),
            len = table.objects.len(),
            "node_table.open"
        );
        Ok(table)
    }

    /// Backing object file; transactions append committed terms here.
    pub fn objects(&self) -> &Arc<ObjectFile> {
        &self.objects
    }

    /// Number of indexed terms.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Returns true if no term has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verified lookup: the stored term under `key` must equal `term`.
    fn locate(&self, state: &NativeState, key: &[u8], term: &Term) -> Result<Option<NodeId>> {
        let Some(record) = state.index.find(key) else {
            return Ok(None);
        };
        let id = NodeId::from_be_slice(record.value())?;
        let stored = NodeCodec::decode(&self.objects.read(id.offset())?)?;
        if &stored != term {
            return Err(TdbError::HashCollision { offset: id.offset() });
        }
        Ok(Some(id))
    }

    fn catch_up(&self, truncate_torn_tail: bool) -> Result<Vec<(NodeId, Term)>> {
        let mut state = self.state.lock();
        self.catch_up_locked(&mut state, truncate_torn_tail)
    }

    fn catch_up_locked(
        &self,
        state: &mut NativeState,
        truncate_torn_tail: bool,
    ) -> Result<Vec<(NodeId, Term)>> {
        let mut added = Vec::new();
        let mut iter = self.objects.all_from(state.indexed_to);
        loop {
            let position = iter.position();
            let Some(next) = iter.next() else { break };
            let (offset, bytes) = match next {
                Ok(entry) => entry,
                Err(TdbError::CorruptionAt { reason, .. }) if truncate_torn_tail => {
                    warn!(file = NODES_FILE, offset = position, reason, "node_table.open.torn_tail");
                    self.objects.truncate_to(position)?;
                    break;
                }
                Err(err) => return Err(err),
            };
            let term = NodeCodec::decode(&bytes)?;
            let key = hash_key(&bytes);
            let id = NodeId::from_offset(offset);
            if let Some(existing) = self.locate(state, &key, &term)? {
                warn!(offset, existing = %existing, "node_table.catch_up.duplicate");
            } else {
                let record = state.index.factory().create(&key, &id.to_be_bytes())?;
                state.index.insert(record)?;
                added.push((id, term));
            }
            state.indexed_to = iter.position();
        }
        Ok(added)
    }
}

impl NodeTable for NodeTableNative {
    fn get_alloc_node_id(&self, term: &Term) -> Result<NodeId> {
        let encoded = NodeCodec::encode(term)?;
        let key = hash_key(&encoded);
        let mut state = self.state.lock();
        if state.indexed_to < self.objects.len() {
            self.catch_up_locked(&mut state, false)?;
        }
        if let Some(id) = self.locate(&state, &key, term)? {
            trace!(%id, "node_table.alloc.hit");
            return Ok(id);
        }
        let offset = self.objects.write(&encoded)?;
        let id = NodeId::from_offset(offset);
        let record = state.index.factory().create(&key, &id.to_be_bytes())?;
        state.index.insert(record)?;
        state.indexed_to = self.objects.len();
        trace!(%id, len = encoded.len(), "node_table.alloc.miss");
        Ok(id)
    }

    fn get_node_id_for_node(&self, term: &Term) -> Result<NodeIdRef> {
        if term.is_any() {
            return Ok(NodeIdRef::Any);
        }
        let encoded = NodeCodec::encode(term)?;
        let key = hash_key(&encoded);
        let state = self.state.lock();
        Ok(match self.locate(&state, &key, term)? {
            Some(id) => NodeIdRef::Concrete(id),
            None => NodeIdRef::Absent,
        })
    }

    fn get_node_for_node_id(&self, id: NodeId) -> Result<Option<Term>> {
        if id.is_inline() || id.offset() >= self.objects.len() {
            return Ok(None);
        }
        let bytes = match self.objects.read(id.offset()) {
            Ok(bytes) => bytes,
            Err(TdbError::ObjectNotFound { .. } | TdbError::CorruptionAt { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let state = self.state.lock();
        let indexed = state
            .index
            .find(&hash_key(&bytes))
            .is_some_and(|record| record.value() == id.to_be_bytes().as_slice());
        if !indexed {
            return Ok(None);
        }
        NodeCodec::decode(&bytes).map(Some)
    }

    fn all(&self) -> Result<NodeIter> {
        let iter = self.objects.all().map(|entry| -> Result<(NodeId, Term)> {
            let (offset, bytes) = entry?;
            Ok((NodeId::from_offset(offset), NodeCodec::decode(&bytes)?))
        });
        Ok(Box::new(iter))
    }

    fn limit(&self) -> u64 {
        self.objects.len()
    }

    fn refresh(&self) -> Result<Vec<(NodeId, Term)>> {
        let added = self.catch_up(false)?;
        if !added.is_empty() {
            debug!(added = added.len(), "node_table.refresh");
        }
        Ok(added)
    }

    fn sync(&self) -> Result<()> {
        self.objects.sync(false)?;
        if let Some(file) = &self.index_file {
            let state = self.state.lock();
            file.store(state.indexed_to, &state.index)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sync()?;
        self.objects.close()
    }
}
