#![forbid(unsafe_code)]

use smallvec::SmallVec;

use crate::types::{NodeId, Result, TdbError};

/// Inline capacity fits a quad key (four node ids).
pub type KeyBytes = SmallVec<[u8; 32]>;
/// Inline capacity fits one node id.
pub type ValueBytes = SmallVec<[u8; 8]>;

/// Fixed-length key with an optional fixed-length value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Record {
    key: KeyBytes,
    value: ValueBytes,
}

impl Record {
    pub(crate) fn from_parts(key: KeyBytes, value: ValueBytes) -> Self {
        Self { key, value }
    }

    /// Key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Value bytes; empty for key-only records.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Splits the key into node ids.
    pub fn key_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.key
            .chunks_exact(NodeId::SIZE)
            .filter_map(|chunk| NodeId::from_be_slice(chunk).ok())
    }
}

/// Shape of the records stored in one index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecordFactory {
    key_len: usize,
    value_len: usize,
}

impl RecordFactory {
    /// Factory for records with the given key and value lengths.
    pub fn new(key_len: usize, value_len: usize) -> Self {
        Self { key_len, value_len }
    }

    /// Factory for key-only records of `arity` node ids.
    pub fn for_tuples(arity: usize) -> Self {
        Self::new(arity * NodeId::SIZE, 0)
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Value length in bytes.
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// Full record length in bytes.
    pub fn record_len(&self) -> usize {
        self.key_len + self.value_len
    }

    /// Builds a record, checking both lengths.
    pub fn create(&self, key: &[u8], value: &[u8]) -> Result<Record> {
        if key.len() != self.key_len || value.len() != self.value_len {
            return Err(TdbError::InvalidOwned(format!(
                "record shape ({}, {}) does not match factory ({}, {})",
                key.len(),
                value.len(),
                self.key_len,
                self.value_len
            )));
        }
        Ok(Record::from_parts(
            KeyBytes::from_slice(key),
            ValueBytes::from_slice(value),
        ))
    }

    /// Builds a key-only record from node ids.
    pub fn create_from_ids(&self, ids: &[NodeId]) -> Result<Record> {
        let mut key = KeyBytes::new();
        for id in ids {
            key.extend_from_slice(&id.to_be_bytes());
        }
        self.create(&key, &[])
    }
}
