use std::path::Path;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_store;
use crate::admin::Result;
use crate::storage::nodes::NodeTable;
use crate::storage::tuple::TupleTable;
use crate::store::Store;
use crate::types::NodeIdRef;

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Compares index sizes only.
    Fast,
    /// Cross-checks every tuple and every stored term.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Info,
            message: message.into(),
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Rows in the primary index of every table.
    pub tuples_checked: u64,
    /// Secondary index entries looked up.
    pub index_entries_checked: u64,
    /// Stored terms read back.
    pub nodes_checked: u64,
    /// Node ids resolved from tuples.
    pub ids_resolved: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification passed without finding any issues.
    pub success: bool,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the data structures examined.
    pub counts: VerifyCounts,
}

/// Opens the store at `path` and verifies it.
pub fn verify(path: impl AsRef<Path>, opts: &AdminOpenOptions, level: VerifyLevel) -> Result<VerifyReport> {
    let store = open_store(path.as_ref(), opts)?;
    let report = verify_store(&store, level)?;
    store.close()?;
    Ok(report)
}

/// Verifies an open store against its latest view.
pub fn verify_store(store: &Store, level: VerifyLevel) -> Result<VerifyReport> {
    let view = store.view();
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();

    for table in view.data().tables() {
        check_index_sizes(table, &mut findings);
    }

    if matches!(level, VerifyLevel::Full) {
        for table in view.data().tables() {
            check_table(table, view.nodes(), &mut findings, &mut counts)?;
        }
        check_nodes(view.nodes(), &mut findings, &mut counts)?;
    }

    let success = findings
        .iter()
        .all(|f| !matches!(f.severity, VerifySeverity::Error));
    if success {
        findings.push(VerifyFinding::info(format!(
            "verified version {} at {:?} level",
            view.version(),
            level
        )));
    }
    Ok(VerifyReport {
        level,
        success,
        findings,
        counts,
    })
}

fn check_index_sizes(table: &TupleTable, findings: &mut Vec<VerifyFinding>) {
    let Some((primary, secondary)) = table.indexes().split_first() else {
        return;
    };
    for index in secondary {
        if index.len() != primary.len() {
            push_error(
                findings,
                format!(
                    "{}: index {} has {} entries, primary {} has {}",
                    table.name(),
                    index.name(),
                    index.len(),
                    primary.name(),
                    primary.len()
                ),
            );
        }
    }
}

fn check_table(
    table: &TupleTable,
    nodes: &dyn NodeTable,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> Result<()> {
    let Some((primary, secondary)) = table.indexes().split_first() else {
        return Ok(());
    };
    for tuple in primary.all() {
        counts.tuples_checked += 1;
        for index in secondary {
            counts.index_entries_checked += 1;
            if !index.contains(&tuple)? {
                push_error(
                    findings,
                    format!("{}: tuple {:?} missing from index {}", table.name(), tuple, index.name()),
                );
            }
        }
        for id in tuple.iter().filter(|id| !id.is_inline()) {
            counts.ids_resolved += 1;
            if nodes.get_node_for_node_id(*id)?.is_none() {
                push_error(
                    findings,
                    format!("{}: node id {} does not resolve", table.name(), id.offset()),
                );
            }
        }
    }
    Ok(())
}

fn check_nodes(nodes: &dyn NodeTable, findings: &mut Vec<VerifyFinding>, counts: &mut VerifyCounts) -> Result<()> {
    for entry in nodes.all()? {
        let (id, term) = entry?;
        counts.nodes_checked += 1;
        match nodes.get_node_id_for_node(&term)? {
            NodeIdRef::Concrete(found) if found == id => {}
            other => push_error(
                findings,
                format!("node at offset {} maps back to {:?}", id.offset(), other),
            ),
        }
    }
    Ok(())
}

fn push_error(findings: &mut Vec<VerifyFinding>, message: String) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding::error(message));
    }
}
