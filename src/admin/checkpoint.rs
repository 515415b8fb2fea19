use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_store;
use crate::admin::Result;

/// Report generated after executing a checkpoint operation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReport {
    /// Duration of the checkpoint operation in milliseconds.
    pub duration_ms: f64,
    /// Version written to every index snapshot.
    pub version: u64,
    /// Journal bytes after the header before the checkpoint ran.
    pub journal_bytes_before: u64,
    /// Committed transactions recovery replayed on open.
    pub replayed: usize,
}

/// Opens the store at `path`, checkpoints it and closes it again.
///
/// Opening already replays and checkpoints any committed transactions left in
/// the journal; the report says how many there were.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the checkpoint fails.
pub fn checkpoint(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<CheckpointReport> {
    let store = open_store(path.as_ref(), opts)?;
    let journal_bytes_before = store.journal().len();
    let start = Instant::now();
    store.checkpoint()?;
    let elapsed = start.elapsed();
    let report = CheckpointReport {
        duration_ms: elapsed.as_secs_f64() * 1_000.0,
        version: store.version(),
        journal_bytes_before,
        replayed: store.recovery().replayed,
    };
    store.close()?;
    Ok(report)
}
