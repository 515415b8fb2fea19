use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_store;
use crate::admin::Result;
use crate::storage::nodes::CacheMetricsSnapshot;
use crate::store::Store;
use crate::txn::TxnCountersSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub store: StoreStatsSection,
    pub tables: Vec<TableStatsSection>,
    pub journal: JournalStatsSection,
    pub transactions: TxnCountersSnapshot,
    pub node_cache: NodeCacheSection,
    pub filesystem: Option<Vec<FileStats>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatsSection {
    pub location: String,
    pub version: u64,
    pub node_entries: usize,
    pub node_bytes: u64,
    pub inline_values: bool,
    pub triples: usize,
    pub quads: usize,
    pub prefixes: usize,
}

/// One tuple table and the size of each of its indexes.
#[derive(Debug, Clone, Serialize)]
pub struct TableStatsSection {
    pub name: String,
    pub rows: usize,
    pub indexes: Vec<IndexStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalStatsSection {
    /// Bytes after the header.
    pub bytes: u64,
    pub entries_appended: u64,
    pub bytes_appended: u64,
    pub syncs: u64,
    pub truncations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeCacheSection {
    #[serde(flatten)]
    pub metrics: CacheMetricsSnapshot,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub name: String,
    pub size_bytes: u64,
}

/// Opens the store at `path` and reports on it.
pub fn stats(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<StatsReport> {
    let store = open_store(path.as_ref(), opts)?;
    let report = store_stats(&store)?;
    store.close()?;
    Ok(report)
}

/// Reports on an open store.
pub fn store_stats(store: &Store) -> Result<StatsReport> {
    let view = store.view();
    let data = view.data();
    let [triples, quads, prefixes] = data.tables();
    let tables = data
        .tables()
        .iter()
        .map(|table| TableStatsSection {
            name: table.name().to_owned(),
            rows: table.len(),
            indexes: table
                .indexes()
                .iter()
                .map(|index| IndexStats {
                    name: index.name().to_owned(),
                    entries: index.len(),
                })
                .collect(),
        })
        .collect();

    let journal = store.journal();
    let counters = journal.stats();
    let metrics = store.cache_metrics();
    Ok(StatsReport {
        store: StoreStatsSection {
            location: format!("{:?}", store.location()),
            version: view.version(),
            node_entries: store.node_count(),
            node_bytes: store.node_bytes(),
            inline_values: store.params().inline_values,
            triples: triples.len(),
            quads: quads.len(),
            prefixes: prefixes.len(),
        },
        tables,
        journal: JournalStatsSection {
            bytes: journal.len(),
            entries_appended: counters.entries_appended,
            bytes_appended: counters.bytes_appended,
            syncs: counters.syncs,
            truncations: counters.truncations,
        },
        transactions: store.counters(),
        node_cache: NodeCacheSection {
            metrics,
            hit_rate: metrics.hit_rate(),
        },
        filesystem: store.location().path().map(list_files).transpose()?,
    })
}

fn list_files(dir: &Path) -> Result<Vec<FileStats>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            files.push(FileStats {
                name: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: meta.len(),
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
