use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_store;
use crate::admin::Result;
use crate::codec::{ProtobufStreamReader, ProtobufStreamWriter, StreamRdf};
use crate::model::{Quad, Triple};
use crate::store::Store;
use crate::txn::Transaction;
use crate::types::Result as TdbResult;

/// What a load added.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoadReport {
    /// Stream rows read.
    pub rows: u64,
    /// Triples that were not already stored.
    pub triples_added: u64,
    /// Quads that were not already stored.
    pub quads_added: u64,
    pub prefixes: u64,
    /// Version published by the load, unchanged if it added nothing.
    pub version: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DumpReport {
    pub prefixes: u64,
    pub triples: u64,
    pub quads: u64,
    pub version: u64,
}

/// Adds everything a stream sends to one write transaction.
struct TxnSink<'a> {
    txn: &'a mut Transaction,
    report: LoadReport,
}

impl StreamRdf for TxnSink<'_> {
    // Relative IRIs are resolved by the producer; the base is informational.
    fn base(&mut self, _iri: &str) -> TdbResult<()> {
        Ok(())
    }

    fn prefix(&mut self, prefix: &str, iri: &str) -> TdbResult<()> {
        self.txn.set_prefix(None, prefix, iri)?;
        self.report.prefixes += 1;
        Ok(())
    }

    fn triple(&mut self, triple: &Triple) -> TdbResult<()> {
        if self.txn.add_triple(triple)? {
            self.report.triples_added += 1;
        }
        Ok(())
    }

    fn quad(&mut self, quad: &Quad) -> TdbResult<()> {
        if self.txn.add(quad)? {
            self.report.quads_added += 1;
        }
        Ok(())
    }
}

/// Loads a delimited protobuf RDF stream into `store` as one transaction.
///
/// Nothing is committed if any row fails to decode.
pub fn load_into<R: Read>(store: &Store, input: R) -> TdbResult<LoadReport> {
    let mut report = store.write(|txn| {
        let mut sink = TxnSink {
            txn,
            report: LoadReport::default(),
        };
        let rows = ProtobufStreamReader::new(input).parse(&mut sink)?;
        Ok(LoadReport { rows, ..sink.report })
    })?;
    report.version = store.version();
    info!(
        rows = report.rows,
        triples = report.triples_added,
        quads = report.quads_added,
        version = report.version,
        "admin.load"
    );
    Ok(report)
}

/// Writes the store's latest view as a delimited protobuf RDF stream:
/// dataset prefixes, default-graph triples, then named-graph quads.
pub fn dump_from<W: Write>(store: &Store, out: W) -> TdbResult<DumpReport> {
    store.read(|txn| {
        let mut writer = ProtobufStreamWriter::new(out);
        let mut report = DumpReport {
            version: txn.start_version(),
            ..DumpReport::default()
        };
        writer.start()?;
        for (prefix, uri) in txn.prefixes(None)? {
            writer.prefix(&prefix, &uri)?;
            report.prefixes += 1;
        }
        for triple in txn.find_triples(None, None, None)? {
            writer.triple(&triple?)?;
            report.triples += 1;
        }
        for quad in txn.find_quads(None, None, None, None)? {
            writer.quad(&quad?)?;
            report.quads += 1;
        }
        writer.finish()?;
        Ok(report)
    })
}

/// Opens the store at `path` and loads the stream in `file` into it.
pub fn load(path: impl AsRef<Path>, opts: &AdminOpenOptions, file: impl AsRef<Path>) -> Result<LoadReport> {
    let store = open_store(path.as_ref(), opts)?;
    let input = BufReader::new(File::open(file)?);
    let report = load_into(&store, input)?;
    store.close()?;
    Ok(report)
}

/// Opens the store at `path` and dumps it to `file`.
pub fn dump(path: impl AsRef<Path>, opts: &AdminOpenOptions, file: impl AsRef<Path>) -> Result<DumpReport> {
    let store = open_store(path.as_ref(), opts)?;
    let out = BufWriter::new(File::create(file)?);
    let report = dump_from(&store, out)?;
    store.close()?;
    Ok(report)
}
