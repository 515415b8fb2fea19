#![forbid(unsafe_code)]
//! Result rows: a delimited `RdfVarTuple` header naming the variables, then
//! one delimited `RdfDataTuple` per row. Unbound positions are sent as the
//! undefined marker.

use std::io::{Read, Write};

use super::convert::{to_wire_opt, TermDecoder};
use super::prefix::PrefixMap;
use super::proto::{RdfDataTuple, RdfVar, RdfVarTuple};
use super::{read_delimited, write_delimited};
use crate::model::Term;
use crate::types::{Result, TdbError};

/// One row of bindings, in header order.
pub type Row = Vec<Option<Term>>;

/// Writes a variable header, then one row per [`write_row`](Self::write_row).
pub struct ResultRowWriter<W: Write> {
    out: W,
    arity: usize,
    prefixes: Option<PrefixMap>,
    allow_values: bool,
}

impl<W: Write> ResultRowWriter<W> {
    /// Writes the header for `vars`.
    pub fn new(mut out: W, vars: &[&str]) -> Result<Self> {
        let header = RdfVarTuple {
            vars: vars.iter().map(|name| RdfVar { name: (*name).to_owned() }).collect(),
        };
        write_delimited(&mut out, &header)?;
        Ok(Self {
            out,
            arity: vars.len(),
            prefixes: None,
            allow_values: true,
        })
    }

    /// Abbreviates IRIs through `prefixes`; the reader must be given the same map.
    pub fn with_prefixes(mut self, prefixes: PrefixMap) -> Self {
        self.prefixes = Some(prefixes);
        self
    }

    /// Chooses whether numeric literals are sent as values. On by default.
    pub fn allow_values(mut self, allow: bool) -> Self {
        self.allow_values = allow;
        self
    }

    /// Writes one row; `None` marks an unbound variable. The row must have
    /// one entry per header variable.
    pub fn write_row(&mut self, row: &[Option<Term>]) -> Result<()> {
        if row.len() != self.arity {
            return Err(TdbError::Arity {
                expected: self.arity,
                actual: row.len(),
            });
        }
        let tuple = RdfDataTuple {
            row: row
                .iter()
                .map(|term| to_wire_opt(term.as_ref(), self.prefixes.as_ref(), self.allow_values))
                .collect::<Result<_>>()?,
        };
        write_delimited(&mut self.out, &tuple)
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Reads what a [`ResultRowWriter`] wrote.
pub struct ResultRowReader<R: Read> {
    input: R,
    vars: Vec<String>,
    decoder: TermDecoder,
    scratch: Vec<u8>,
}

impl<R: Read> ResultRowReader<R> {
    /// Reads the header.
    pub fn new(input: R) -> Result<Self> {
        Self::with_prefixes(input, PrefixMap::new())
    }

    /// Reads the header; abbreviated IRIs expand through `prefixes`.
    pub fn with_prefixes(mut input: R, prefixes: PrefixMap) -> Result<Self> {
        let mut scratch = Vec::new();
        let header: RdfVarTuple = read_delimited(&mut input, &mut scratch)?
            .ok_or_else(|| TdbError::encoding("result rows have no header"))?;
        Ok(Self {
            input,
            vars: header.vars.into_iter().map(|var| var.name).collect(),
            decoder: TermDecoder::new(prefixes),
            scratch,
        })
    }

    /// Variable names from the header.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Next row, or `None` at the end of input.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(tuple) = read_delimited::<RdfDataTuple, _>(&mut self.input, &mut self.scratch)? else {
            return Ok(None);
        };
        if tuple.row.len() != self.vars.len() {
            return Err(TdbError::Arity {
                expected: self.vars.len(),
                actual: tuple.row.len(),
            });
        }
        tuple
            .row
            .iter()
            .map(|wire| self.decoder.term_opt(wire))
            .collect::<Result<Row>>()
            .map(Some)
    }
}

impl<R: Read> Iterator for ResultRowReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}
