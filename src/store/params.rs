#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::primitives::io::Location;
use crate::storage::colmap::ColumnMap;
use crate::storage::nodes::CacheSizes;
use crate::types::{Result, TdbError};

/// Store parameters file.
pub const PARAMS_FILE: &str = "tdb.cfg";

/// Store parameters.
///
/// Index layouts and inline values are fixed when a store is created; the
/// copy in `tdb.cfg` wins over what the application passes. Cache sizes and
/// commit settings are taken from the application on every open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreParams {
    /// Triple index orders; the first is the primary.
    pub triple_indexes: Vec<String>,
    /// Quad index orders; the first is the primary.
    pub quad_indexes: Vec<String>,
    /// Prefix table index orders (graph, prefix, uri).
    pub prefix_indexes: Vec<String>,
    /// Pack integer, decimal and boolean values into node ids.
    pub inline_values: bool,
    /// Entries in the term to id cache.
    pub node_to_id_cache_size: usize,
    /// Entries in the id to term cache.
    pub id_to_node_cache_size: usize,
    /// Entries in the known-absent cache.
    pub node_miss_cache_size: usize,
    /// Checkpoint once the journal holds this many bytes.
    pub journal_threshold_bytes: u64,
    /// Checkpoint after this many commits reach the journal; 0 leaves it to
    /// the byte threshold.
    pub checkpoint_batch_commits: u64,
    /// Sync the journal before a commit is enacted.
    pub sync_on_commit: bool,
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            triple_indexes: labels(&["SPO", "POS", "OSP"]),
            quad_indexes: labels(&["GSPO", "GPOS", "GOSP", "SPOG", "POSG", "OSPG"]),
            prefix_indexes: labels(&["GPU"]),
            inline_values: true,
            node_to_id_cache_size: 200_000,
            id_to_node_cache_size: 750_000,
            node_miss_cache_size: 1_000,
            journal_threshold_bytes: 4 << 20,
            checkpoint_batch_commits: 100,
            sync_on_commit: true,
        }
    }
}

impl StoreParams {
    /// Small caches, for tests and tools that open a store briefly.
    pub fn small() -> Self {
        Self {
            node_to_id_cache_size: 1_000,
            id_to_node_cache_size: 1_000,
            node_miss_cache_size: 100,
            ..Self::default()
        }
    }

    /// Cache capacities for the node table.
    pub fn cache_sizes(&self) -> CacheSizes {
        CacheSizes {
            node_to_id: self.node_to_id_cache_size,
            id_to_node: self.id_to_node_cache_size,
            node_miss: self.node_miss_cache_size,
        }
    }

    /// Checks every index list: non-empty, distinct, permutations of the primary.
    pub fn validate(&self) -> Result<()> {
        check_indexes("triple", &self.triple_indexes, 3)?;
        check_indexes("quad", &self.quad_indexes, 4)?;
        check_indexes("prefix", &self.prefix_indexes, 3)?;
        Ok(())
    }

    /// Static settings from `stored`, dynamic settings from `self`.
    pub fn merged_with_stored(&self, stored: &StoreParams) -> StoreParams {
        StoreParams {
            triple_indexes: stored.triple_indexes.clone(),
            quad_indexes: stored.quad_indexes.clone(),
            prefix_indexes: stored.prefix_indexes.clone(),
            inline_values: stored.inline_values,
            ..self.clone()
        }
    }

    /// Reads `tdb.cfg`, if present.
    pub fn load(location: &Location) -> Result<Option<StoreParams>> {
        let Some(bytes) = location.read_file(PARAMS_FILE)? else {
            return Ok(None);
        };
        let params: StoreParams = serde_json::from_slice(&bytes)?;
        params.validate()?;
        Ok(Some(params))
    }

    /// Writes `tdb.cfg`.
    pub fn store(&self, location: &Location) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        location.write_atomic(PARAMS_FILE, &bytes)
    }

    /// Settings to open `location` with: the stored file merged with `self`,
    /// or `self` written out as the new file for a fresh location.
    pub fn resolve(&self, location: &Location) -> Result<StoreParams> {
        self.validate()?;
        match Self::load(location)? {
            Some(stored) => {
                let effective = self.merged_with_stored(&stored);
                if effective.triple_indexes != self.triple_indexes
                    || effective.quad_indexes != self.quad_indexes
                    || effective.inline_values != self.inline_values
                {
                    info!(file = PARAMS_FILE, "store_params.stored_layout_wins");
                }
                Ok(effective)
            }
            None => {
                self.store(location)?;
                debug!(file = PARAMS_FILE, "store_params.created");
                Ok(self.clone())
            }
        }
    }
}

fn check_indexes(kind: &str, indexes: &[String], arity: usize) -> Result<()> {
    let primary = indexes
        .first()
        .ok_or_else(|| TdbError::InvalidOwned(format!("no {kind} indexes configured")))?;
    if primary.chars().count() != arity {
        return Err(TdbError::InvalidOwned(format!(
            "{kind} index {primary} must have {arity} columns"
        )));
    }
    for (pos, label) in indexes.iter().enumerate() {
        ColumnMap::from_labels(primary, label)?;
        if indexes[..pos].contains(label) {
            return Err(TdbError::InvalidOwned(format!("{kind} index {label} listed twice")));
        }
    }
    Ok(())
}
