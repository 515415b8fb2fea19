#![forbid(unsafe_code)]

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use super::{NodeIter, NodeTable};
use crate::model::Term;
use crate::types::{NodeId, NodeIdRef, Result};

/// Capacities of the three caches; zero disables a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheSizes {
    /// Term to id.
    pub node_to_id: usize,
    /// Id to term.
    pub id_to_node: usize,
    /// Terms known not to be stored.
    pub node_miss: usize,
}

/// Lookup counters of a [`NodeTableCache`].
#[derive(Default)]
pub struct CacheMetrics {
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    negative_hits: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CacheMetricsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub negative_hits: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        (self.hits + self.negative_hits) as f64 / self.lookups as f64
    }
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
        }
    }

    fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn lookup(&self) {
        self.inc(&self.lookups);
    }

    fn hit(&self) {
        self.inc(&self.hits);
    }

    fn miss(&self) {
        self.inc(&self.misses);
    }

    fn negative_hit(&self) {
        self.inc(&self.negative_hits);
    }
}

struct Caches {
    node_to_id: Option<LruCache<Term, NodeId>>,
    id_to_node: Option<LruCache<NodeId, Term>>,
    node_miss: Option<LruCache<Term, ()>>,
}

fn lru<K: std::hash::Hash + Eq, V>(size: usize) -> Option<LruCache<K, V>> {
    NonZeroUsize::new(size).map(LruCache::new)
}

impl Caches {
    fn remember(&mut self, term: &Term, id: NodeId) {
        if let Some(cache) = &mut self.node_miss {
            cache.pop(term);
        }
        if let Some(cache) = &mut self.node_to_id {
            cache.put(term.clone(), id);
        }
        if let Some(cache) = &mut self.id_to_node {
            cache.put(id, term.clone());
        }
    }
}

/// Bounded caches in front of a node table.
///
/// One mutex covers both the caches and the call into the base table, so a
/// cache update can never interleave with a base change for the same term.
pub struct NodeTableCache<T> {
    base: T,
    caches: Mutex<Caches>,
    metrics: CacheMetrics,
}

impl<T: NodeTable> NodeTableCache<T> {
    pub fn new(base: T, sizes: CacheSizes) -> Self {
        Self {
            base,
            caches: Mutex::new(Caches {
                node_to_id: lru(sizes.node_to_id),
                id_to_node: lru(sizes.id_to_node),
                node_miss: lru(sizes.node_miss),
            }),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn base(&self) -> &T {
        &self.base
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl<T: NodeTable> NodeTable for NodeTableCache<T> {
    fn get_alloc_node_id(&self, term: &Term) -> Result<NodeId> {
        self.metrics.lookup();
        let mut caches = self.caches.lock();
        if let Some(id) = caches.node_to_id.as_mut().and_then(|c| c.get(term).copied()) {
            self.metrics.hit();
            return Ok(id);
        }
        self.metrics.miss();
        let id = self.base.get_alloc_node_id(term)?;
        caches.remember(term, id);
        trace!(%id, "node_cache.alloc");
        Ok(id)
    }

    fn get_node_id_for_node(&self, term: &Term) -> Result<NodeIdRef> {
        if term.is_any() {
            return Ok(NodeIdRef::Any);
        }
        self.metrics.lookup();
        let mut caches = self.caches.lock();
        if let Some(id) = caches.node_to_id.as_mut().and_then(|c| c.get(term).copied()) {
            self.metrics.hit();
            return Ok(NodeIdRef::Concrete(id));
        }
        if caches.node_miss.as_mut().is_some_and(|c| c.get(term).is_some()) {
            self.metrics.negative_hit();
            return Ok(NodeIdRef::Absent);
        }
        self.metrics.miss();
        let found = self.base.get_node_id_for_node(term)?;
        match found {
            NodeIdRef::Concrete(id) => caches.remember(term, id),
            NodeIdRef::Absent => {
                if let Some(cache) = &mut caches.node_miss {
                    cache.put(term.clone(), ());
                }
            }
            NodeIdRef::Any => {}
        }
        Ok(found)
    }

    fn get_node_for_node_id(&self, id: NodeId) -> Result<Option<Term>> {
        self.metrics.lookup();
        let mut caches = self.caches.lock();
        if let Some(term) = caches.id_to_node.as_mut().and_then(|c| c.get(&id).cloned()) {
            self.metrics.hit();
            return Ok(Some(term));
        }
        self.metrics.miss();
        let term = self.base.get_node_for_node_id(id)?;
        if let Some(term) = &term {
            caches.remember(term, id);
        }
        Ok(term)
    }

    fn all(&self) -> Result<NodeIter> {
        self.base.all()
    }

    fn limit(&self) -> u64 {
        self.base.limit()
    }

    fn refresh(&self) -> Result<Vec<(NodeId, Term)>> {
        let mut caches = self.caches.lock();
        let added = self.base.refresh()?;
        for (id, term) in &added {
            caches.remember(term, *id);
        }
        Ok(added)
    }

    fn sync(&self) -> Result<()> {
        self.base.sync()
    }

    fn close(&self) -> Result<()> {
        self.base.close()
    }
}
