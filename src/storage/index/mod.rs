#![forbid(unsafe_code)]
//! Sorted record indexes.
//!
//! A [`RecordIndex`] is a persistent ordered map from fixed-length keys to
//! fixed-length values. Cloning is O(1) and clones share structure, so a
//! writer can mutate its copy while readers keep iterating the old one.

use std::collections::VecDeque;
use std::ops::Bound;

use imbl::OrdMap;

use crate::primitives::bytes::ord::prefix_successor;
use crate::storage::record::{KeyBytes, Record, RecordFactory, ValueBytes};
use crate::types::Result;

mod file;

pub use file::IndexFile;

/// Ordered set of records keyed by their key bytes.
#[derive(Clone)]
pub struct RecordIndex {
    factory: RecordFactory,
    map: OrdMap<KeyBytes, ValueBytes>,
}

impl RecordIndex {
    /// An empty index for records of the given shape.
    pub fn new(factory: RecordFactory) -> Self {
        Self {
            factory,
            map: OrdMap::new(),
        }
    }

    /// Record shape.
    pub fn factory(&self) -> RecordFactory {
        self.factory
    }

    /// Inserts or replaces a record. Returns false if an identical record was present.
    pub fn insert(&mut self, record: Record) -> Result<bool> {
        let record = self.factory.create(record.key(), record.value())?;
        if self.map.get(record.key()).map(|v| v.as_slice()) == Some(record.value()) {
            return Ok(false);
        }
        self.map.insert(
            KeyBytes::from_slice(record.key()),
            ValueBytes::from_slice(record.value()),
        );
        Ok(true)
    }

    /// Removes the record with this key. Returns false if none was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.map.remove(key).is_some()
    }

    /// Record stored under `key`.
    pub fn find(&self, key: &[u8]) -> Option<Record> {
        self.map
            .get(key)
            .map(|value| Record::from_parts(KeyBytes::from_slice(key), value.clone()))
    }

    /// Returns true if a record with this key exists.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Records with keys inside the bounds, in key order.
    pub fn range<'a>(
        &'a self,
        min: Bound<&'a [u8]>,
        max: Bound<&'a [u8]>,
    ) -> impl Iterator<Item = Record> + 'a {
        self.map
            .range::<_, [u8]>((min, max))
            .map(|(k, v)| Record::from_parts(k.clone(), v.clone()))
    }

    /// Lazily scans records whose key starts with `prefix`, in key order.
    ///
    /// The scan holds its own snapshot of the index, so later changes to
    /// `self` are not observed.
    pub fn prefix_scan(&self, prefix: &[u8]) -> RecordScan {
        let (resume, upper) = if prefix.is_empty() {
            (Bound::Unbounded, None)
        } else {
            (
                Bound::Included(KeyBytes::from_slice(prefix)),
                prefix_successor(prefix).map(KeyBytes::from_vec),
            )
        };
        RecordScan {
            index: self.clone(),
            resume,
            upper,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// All records in key order.
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.map
            .iter()
            .map(|(k, v)| Record::from_parts(k.clone(), v.clone()))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

const SCAN_BATCH: usize = 64;

/// Owning, batched range scan over a snapshot of a [`RecordIndex`].
pub struct RecordScan {
    index: RecordIndex,
    resume: Bound<KeyBytes>,
    upper: Option<KeyBytes>,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl RecordScan {
    fn refill(&mut self) {
        let lower = match &self.resume {
            Bound::Included(key) => Bound::Included(key.as_slice()),
            Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let upper = match &self.upper {
            Some(key) => Bound::Excluded(key.as_slice()),
            None => Bound::Unbounded,
        };
        let batch: Vec<Record> = self.index.range(lower, upper).take(SCAN_BATCH).collect();
        if batch.len() < SCAN_BATCH {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            self.resume = Bound::Excluded(KeyBytes::from_slice(last.key()));
        }
        self.buffer.extend(batch);
    }
}

impl Iterator for RecordScan {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front()
    }
}
