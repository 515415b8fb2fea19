#![forbid(unsafe_code)]

//! Store administration and maintenance utilities.
//!
//! Every entry point takes a store directory and [`AdminOpenOptions`], opens
//! the store, does its work and closes it again. The `*_store`, `*_into` and
//! `*_from` variants work on a store that is already open.

mod checkpoint;
mod error;
mod journal;
mod options;
mod stats;
mod transfer;
mod util;
mod verify;

/// Checkpoints a store: index snapshots are written and the journal emptied.
pub use checkpoint::{checkpoint, CheckpointReport};

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Lists journal entries.
pub use journal::{journal_entries, JournalEntrySummary, JournalListing};

/// Configuration options for opening a store in admin mode.
pub use options::AdminOpenOptions;

/// Statistics collection and reporting.
///
/// Covers the node table, every tuple index, the journal, transaction
/// counters and the node cache.
pub use stats::{
    stats, store_stats, FileStats, IndexStats, JournalStatsSection, NodeCacheSection, StatsReport,
    StoreStatsSection, TableStatsSection,
};

/// Bulk load and dump as delimited protobuf RDF streams.
pub use transfer::{dump, dump_from, load, load_into, DumpReport, LoadReport};

/// Store integrity verification.
///
/// Verifies that the indexes of every table agree and that every stored
/// term and tuple id resolves.
pub use verify::{verify, verify_store, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};

/// Opens a directory store for an admin command.
pub use util::open_store;
