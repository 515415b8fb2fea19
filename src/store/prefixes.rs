#![forbid(unsafe_code)]
//! Prefix declarations stored as `(graph, prefix, uri)` tuples.
//!
//! The prefix table shares the dataset's node table: the graph is its term,
//! the prefix a simple literal and the namespace an IRI.

use crate::model::Term;
use crate::storage::node_tuple::NodeTupleTable;
use crate::storage::nodes::NodeTable;
use crate::types::{Result, TdbError};

/// Journal and table name of the prefix table.
pub const PREFIX_TABLE: &str = "prefixes";

/// Graph key for dataset-wide prefixes when `graph` is `None`.
pub fn graph_key(graph: Option<&Term>) -> Term {
    graph.cloned().unwrap_or_else(Term::default_graph)
}

fn row(graph: Term, prefix: &str, uri: &str) -> [Term; 3] {
    [graph, Term::literal(prefix), Term::iri(uri)]
}

fn decode_row(row: &[Term]) -> Result<(String, String)> {
    match row {
        [_, Term::Literal(prefix), Term::Iri(uri)] => Ok((prefix.lexical().to_owned(), uri.to_string())),
        _ => Err(TdbError::Corruption("malformed prefix table row")),
    }
}

/// Sets `prefix` to `uri` in `graph`, replacing an earlier mapping.
pub fn set<N: NodeTable>(
    table: &mut NodeTupleTable<N>,
    graph: Option<&Term>,
    prefix: &str,
    uri: &str,
) -> Result<bool> {
    let graph = graph_key(graph);
    if let Some(current) = get(table, Some(&graph), prefix)? {
        if current == uri {
            return Ok(false);
        }
        table.delete(&row(graph.clone(), prefix, &current))?;
    }
    table.add(&row(graph, prefix, uri))
}

/// Removes `prefix` from `graph`. Returns true if it was declared.
pub fn remove<N: NodeTable>(
    table: &mut NodeTupleTable<N>,
    graph: Option<&Term>,
    prefix: &str,
) -> Result<bool> {
    let graph = graph_key(graph);
    match get(table, Some(&graph), prefix)? {
        Some(uri) => table.delete(&row(graph, prefix, &uri)),
        None => Ok(false),
    }
}

/// Namespace bound to `prefix` in `graph`.
pub fn get<N: NodeTable>(
    table: &NodeTupleTable<N>,
    graph: Option<&Term>,
    prefix: &str,
) -> Result<Option<String>> {
    let graph = graph_key(graph);
    let prefix = Term::literal(prefix);
    match table.find(&[Some(&graph), Some(&prefix), None])?.next() {
        Some(found) => Ok(Some(decode_row(&found?)?.1)),
        None => Ok(None),
    }
}

/// Every `(prefix, uri)` pair declared in `graph`, ordered by prefix id.
pub fn list<N: NodeTable>(table: &NodeTupleTable<N>, graph: Option<&Term>) -> Result<Vec<(String, String)>> {
    let graph = graph_key(graph);
    table
        .find(&[Some(&graph), None, None])?
        .map(|found| decode_row(&found?))
        .collect()
}
