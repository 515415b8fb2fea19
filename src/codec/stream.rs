#![forbid(unsafe_code)]

use std::io::{Read, Write};

use prost::Message;
use tracing::debug;

use super::convert::{quad_to_wire, triple_to_wire, TermDecoder};
use super::prefix::PrefixMap;
use super::proto::{rdf_stream_row::Row, RdfIri, RdfPrefixDecl, RdfStream, RdfStreamRow};
use super::{read_delimited, write_delimited};
use crate::model::{Quad, Triple};
use crate::types::{Result, TdbError};

/// Receiver of parsed RDF.
pub trait StreamRdf {
    /// Called once before the first row.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after the last row.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Base IRI declaration.
    fn base(&mut self, iri: &str) -> Result<()>;

    /// Prefix declaration; applies to the rows that follow it.
    fn prefix(&mut self, prefix: &str, iri: &str) -> Result<()>;

    /// A default-graph triple.
    fn triple(&mut self, triple: &Triple) -> Result<()>;

    /// A quad; its graph may be the default graph.
    fn quad(&mut self, quad: &Quad) -> Result<()>;
}

/// Collects everything it is sent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamCollector {
    /// Last base IRI declared.
    pub base: Option<String>,
    /// Prefix declarations in arrival order.
    pub prefixes: Vec<(String, String)>,
    /// Triples in arrival order.
    pub triples: Vec<Triple>,
    /// Quads in arrival order.
    pub quads: Vec<Quad>,
    /// Set by `start`.
    pub started: bool,
    /// Set by `finish`.
    pub finished: bool,
}

impl StreamRdf for StreamCollector {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn base(&mut self, iri: &str) -> Result<()> {
        self.base = Some(iri.to_owned());
        Ok(())
    }

    fn prefix(&mut self, prefix: &str, iri: &str) -> Result<()> {
        self.prefixes.push((prefix.to_owned(), iri.to_owned()));
        Ok(())
    }

    fn triple(&mut self, triple: &Triple) -> Result<()> {
        self.triples.push(triple.clone());
        Ok(())
    }

    fn quad(&mut self, quad: &Quad) -> Result<()> {
        self.quads.push(quad.clone());
        Ok(())
    }
}

/// Writes a length-delimited row per call.
///
/// Prefixes declared through the writer abbreviate later IRIs.
pub struct ProtobufStreamWriter<W: Write> {
    out: W,
    prefixes: PrefixMap,
    allow_values: bool,
    rows: u64,
}

impl<W: Write> ProtobufStreamWriter<W> {
    /// Writer that sends numeric literals as values.
    pub fn new(out: W) -> Self {
        Self {
            out,
            prefixes: PrefixMap::new(),
            allow_values: true,
            rows: 0,
        }
    }

    /// Chooses whether numeric literals are sent as values.
    pub fn allow_values(mut self, allow: bool) -> Self {
        self.allow_values = allow;
        self
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Returns the underlying writer without flushing it.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, row: Row) -> Result<()> {
        write_delimited(&mut self.out, &RdfStreamRow { row: Some(row) })?;
        self.rows += 1;
        Ok(())
    }
}

impl<W: Write> StreamRdf for ProtobufStreamWriter<W> {
    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        debug!(rows = self.rows, "stream_writer.finish");
        Ok(())
    }

    fn base(&mut self, iri: &str) -> Result<()> {
        self.emit(Row::Base(RdfIri { iri: iri.to_owned() }))
    }

    fn prefix(&mut self, prefix: &str, iri: &str) -> Result<()> {
        self.prefixes.add(prefix, iri);
        self.emit(Row::PrefixDecl(RdfPrefixDecl {
            prefix: prefix.to_owned(),
            uri: iri.to_owned(),
        }))
    }

    fn triple(&mut self, triple: &Triple) -> Result<()> {
        let wire = triple_to_wire(triple, Some(&self.prefixes), self.allow_values)?;
        self.emit(Row::Triple(wire))
    }

    fn quad(&mut self, quad: &Quad) -> Result<()> {
        let wire = quad_to_wire(quad, Some(&self.prefixes), self.allow_values)?;
        self.emit(Row::Quad(wire))
    }
}

/// Decodes rows in order, keeping the prefixes declared so far.
fn dispatch(decoder: &mut TermDecoder, row: &RdfStreamRow, sink: &mut dyn StreamRdf) -> Result<()> {
    match &row.row {
        Some(Row::PrefixDecl(decl)) => {
            decoder.prefixes_mut().add(decl.prefix.as_str(), decl.uri.as_str());
            sink.prefix(&decl.prefix, &decl.uri)
        }
        Some(Row::Base(iri)) => sink.base(&iri.iri),
        Some(Row::Triple(triple)) => sink.triple(&decoder.triple(triple)?),
        Some(Row::Quad(quad)) => sink.quad(&decoder.quad(quad)?),
        None => Err(TdbError::encoding("stream row is empty")),
    }
}

/// Reads length-delimited rows one at a time.
pub struct ProtobufStreamReader<R: Read> {
    input: R,
    decoder: TermDecoder,
    scratch: Vec<u8>,
}

impl<R: Read> ProtobufStreamReader<R> {
    /// Reader with no prefixes declared yet.
    pub fn new(input: R) -> Self {
        Self {
            input,
            decoder: TermDecoder::default(),
            scratch: Vec::new(),
        }
    }

    /// Next raw row, or `None` at the end of input.
    pub fn next_row(&mut self) -> Result<Option<RdfStreamRow>> {
        read_delimited(&mut self.input, &mut self.scratch)
    }

    /// Sends every remaining row to `sink`, bracketed by `start` and
    /// `finish`. Returns the number of rows read.
    pub fn parse(&mut self, sink: &mut dyn StreamRdf) -> Result<u64> {
        sink.start()?;
        let mut rows = 0;
        while let Some(row) = self.next_row()? {
            dispatch(&mut self.decoder, &row, sink)?;
            rows += 1;
        }
        sink.finish()?;
        debug!(rows, "stream_reader.parse");
        Ok(rows)
    }

    /// Prefixes declared by the rows read so far.
    pub fn prefixes(&self) -> &PrefixMap {
        self.decoder.prefixes()
    }
}

/// Writes everything in `collected` as one non-delimited `RdfStream` message:
/// base, prefixes, triples, quads.
pub fn write_stream_message<W: Write>(out: &mut W, collected: &StreamCollector, allow_values: bool) -> Result<()> {
    let mut prefixes = PrefixMap::new();
    let mut rows = Vec::with_capacity(collected.prefixes.len() + collected.triples.len() + collected.quads.len() + 1);
    if let Some(base) = &collected.base {
        rows.push(Row::Base(RdfIri { iri: base.clone() }));
    }
    for (prefix, uri) in &collected.prefixes {
        prefixes.add(prefix.as_str(), uri.as_str());
        rows.push(Row::PrefixDecl(RdfPrefixDecl {
            prefix: prefix.clone(),
            uri: uri.clone(),
        }));
    }
    for triple in &collected.triples {
        rows.push(Row::Triple(triple_to_wire(triple, Some(&prefixes), allow_values)?));
    }
    for quad in &collected.quads {
        rows.push(Row::Quad(quad_to_wire(quad, Some(&prefixes), allow_values)?));
    }
    let stream = RdfStream {
        row: rows.into_iter().map(|row| RdfStreamRow { row: Some(row) }).collect(),
    };
    out.write_all(&stream.encode_to_vec())?;
    Ok(())
}

/// Reads a whole `RdfStream` message and sends its rows to `sink`.
pub fn read_stream_message<R: Read>(input: &mut R, sink: &mut dyn StreamRdf) -> Result<u64> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    let stream = RdfStream::decode(bytes.as_slice())?;
    let mut decoder = TermDecoder::default();
    sink.start()?;
    for row in &stream.row {
        dispatch(&mut decoder, row, sink)?;
    }
    sink.finish()?;
    Ok(stream.row.len() as u64)
}
