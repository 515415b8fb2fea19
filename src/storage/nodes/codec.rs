#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::model::{Literal, LiteralKind, Term, Triple};
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::var;
use crate::types::{Result, TdbError};

const TAG_IRI: u8 = 1;
const TAG_BLANK: u8 = 2;
const TAG_SIMPLE: u8 = 3;
const TAG_LANG: u8 = 4;
const TAG_TYPED: u8 = 5;
const TAG_VARIABLE: u8 = 6;
const TAG_TRIPLE: u8 = 7;

/// Deepest nesting of quoted triples the codec accepts.
pub const MAX_DEPTH: usize = 64;

/// Binary form of a term as stored in the node object file.
///
/// A tag byte followed by varint-length-prefixed UTF-8 strings; triple terms
/// encode their three components in order.
pub struct NodeCodec;

impl NodeCodec {
    /// Encodes a concrete term.
    pub fn encode(term: &Term) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(32);
        encode_into(term, &mut out, 0)?;
        Ok(out)
    }

    /// Decodes bytes written by [`NodeCodec::encode`]; trailing bytes are an error.
    pub fn decode(bytes: &[u8]) -> Result<Term> {
        let mut cur = Cursor::new(bytes);
        let term = decode_from(&mut cur, 0)?;
        if cur.remaining() != 0 {
            return Err(TdbError::encoding(format!(
                "{} trailing bytes after node",
                cur.remaining()
            )));
        }
        Ok(term)
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    var::encode_u64(s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

fn encode_into(term: &Term, out: &mut Vec<u8>, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(TdbError::encoding("quoted triple nesting too deep"));
    }
    match term {
        Term::Iri(iri) => {
            out.push(TAG_IRI);
            put_str(out, iri);
        }
        Term::Blank(label) => {
            out.push(TAG_BLANK);
            put_str(out, label);
        }
        Term::Literal(lit) => match lit.kind() {
            LiteralKind::Simple => {
                out.push(TAG_SIMPLE);
                put_str(out, lit.lexical());
            }
            LiteralKind::Lang(tag) => {
                out.push(TAG_LANG);
                put_str(out, lit.lexical());
                put_str(out, tag);
            }
            LiteralKind::Typed(datatype) => {
                out.push(TAG_TYPED);
                put_str(out, lit.lexical());
                put_str(out, datatype);
            }
        },
        Term::Variable(name) => {
            out.push(TAG_VARIABLE);
            put_str(out, name);
        }
        Term::Triple(triple) => {
            out.push(TAG_TRIPLE);
            for part in triple.terms() {
                encode_into(part, out, depth + 1)?;
            }
        }
        Term::Any => return Err(TdbError::encoding("the wildcard term cannot be stored")),
    }
    Ok(())
}

fn get_str(cur: &mut Cursor<'_>) -> Result<Arc<str>> {
    let bytes = cur
        .len_prefixed()
        .map_err(|_| TdbError::encoding("truncated node string"))?;
    let s = std::str::from_utf8(bytes).map_err(|e| TdbError::encoding(e.to_string()))?;
    Ok(Arc::from(s))
}

fn decode_from(cur: &mut Cursor<'_>, depth: usize) -> Result<Term> {
    if depth > MAX_DEPTH {
        return Err(TdbError::encoding("quoted triple nesting too deep"));
    }
    let tag = cur
        .u8()
        .map_err(|_| TdbError::encoding("empty node encoding"))?;
    let term = match tag {
        TAG_IRI => Term::Iri(get_str(cur)?),
        TAG_BLANK => Term::Blank(get_str(cur)?),
        TAG_SIMPLE => Term::Literal(Literal::simple(get_str(cur)?)),
        TAG_LANG => {
            let lexical = get_str(cur)?;
            Term::Literal(Literal::lang(lexical, get_str(cur)?))
        }
        TAG_TYPED => {
            let lexical = get_str(cur)?;
            Term::Literal(Literal::typed(lexical, get_str(cur)?))
        }
        TAG_VARIABLE => Term::Variable(get_str(cur)?),
        TAG_TRIPLE => {
            let s = decode_from(cur, depth + 1)?;
            let p = decode_from(cur, depth + 1)?;
            let o = decode_from(cur, depth + 1)?;
            Term::triple(Triple::new(s, p, o))
        }
        other => return Err(TdbError::encoding(format!("unknown node tag {other}"))),
    };
    Ok(term)
}
