#![forbid(unsafe_code)]
//! Conversion between [`Term`]s and wire terms.
//!
//! With values allowed, integer-family, decimal and double literals travel as
//! numbers. Decoding regenerates the canonical lexical form under
//! `xsd:integer`, `xsd:decimal` or `xsd:double`, so `"+007"^^xsd:int` comes
//! back as `"7"^^xsd:integer`.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::trace;

use super::prefix::PrefixMap;
use super::proto::{
    rdf_literal, rdf_term, RdfAny, RdfBNode, RdfDecimal, RdfIri, RdfLiteral, RdfPrefixName, RdfQuad, RdfTerm,
    RdfTriple, RdfUndef, RdfVar,
};
use crate::model::{vocab, LiteralKind, Quad, Term, Triple};
use crate::storage::nodes::inline::{format_decimal, parse_decimal};
use crate::storage::nodes::MAX_DEPTH;
use crate::types::{Result, TdbError};

/// IRIs kept by a [`TermDecoder`] unless told otherwise.
pub const DEFAULT_IRI_CACHE: usize = 5_000;

/// Range of an integer-family datatype, or `None` for other datatypes.
fn integer_range(datatype: &str) -> Option<(i64, i64)> {
    match datatype {
        vocab::XSD_INTEGER | vocab::XSD_LONG => Some((i64::MIN, i64::MAX)),
        vocab::XSD_INT => Some((i32::MIN.into(), i32::MAX.into())),
        vocab::XSD_SHORT => Some((i16::MIN.into(), i16::MAX.into())),
        vocab::XSD_BYTE => Some((i8::MIN.into(), i8::MAX.into())),
        _ => None,
    }
}

/// Parses an integer lexical form: optional sign, then ASCII digits.
fn parse_integer(lexical: &str) -> Option<i64> {
    let digits = lexical.strip_prefix('+').unwrap_or(lexical);
    let unsigned = digits.strip_prefix('-').unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() != lexical.len() && unsigned.len() != digits.len() {
        return None;
    }
    digits.parse().ok()
}

/// Parses an `xsd:double` lexical form.
fn parse_double(lexical: &str) -> Option<f64> {
    match lexical {
        "INF" | "+INF" => return Some(f64::INFINITY),
        "-INF" => return Some(f64::NEG_INFINITY),
        "NaN" => return Some(f64::NAN),
        _ => {}
    }
    let valid = !lexical.is_empty()
        && lexical
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !valid {
        return None;
    }
    lexical.parse().ok()
}

/// Canonical `xsd:double` lexical form, e.g. `1.5E2`.
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INF" } else { "-INF" }.to_owned();
    }
    let formatted = format!("{value:E}");
    match formatted.split_once('E') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => format!("{mantissa}.0E{exponent}"),
        _ => formatted,
    }
}

fn iri_to_wire(iri: &str, prefixes: Option<&PrefixMap>) -> rdf_term::Term {
    match prefixes.and_then(|map| map.abbreviate(iri)) {
        Some((prefix, local)) => rdf_term::Term::PrefixName(RdfPrefixName {
            prefix: prefix.to_owned(),
            local_name: local.to_owned(),
        }),
        None => rdf_term::Term::Iri(RdfIri { iri: iri.to_owned() }),
    }
}

fn value_to_wire(lexical: &str, datatype: &str) -> Option<rdf_term::Term> {
    if let Some((min, max)) = integer_range(datatype) {
        let value = parse_integer(lexical).filter(|v| (min..=max).contains(v))?;
        return Some(rdf_term::Term::ValInteger(value));
    }
    match datatype {
        vocab::XSD_DECIMAL => {
            let (value, scale) = parse_decimal(lexical)?;
            Some(rdf_term::Term::ValDecimal(RdfDecimal { value, scale }))
        }
        vocab::XSD_DOUBLE => parse_double(lexical).map(rdf_term::Term::ValDouble),
        _ => None,
    }
}

/// Encodes `term`, abbreviating IRIs through `prefixes` and, with
/// `allow_values`, sending numeric literals as numbers.
pub fn to_wire(term: &Term, prefixes: Option<&PrefixMap>, allow_values: bool) -> Result<RdfTerm> {
    to_wire_at(term, prefixes, allow_values, 0)
}

fn to_wire_at(term: &Term, prefixes: Option<&PrefixMap>, allow_values: bool, depth: usize) -> Result<RdfTerm> {
    if depth > MAX_DEPTH {
        return Err(TdbError::encoding("quoted triples nested too deeply"));
    }
    let wire = match term {
        Term::Iri(iri) => iri_to_wire(iri, prefixes),
        Term::Blank(label) => rdf_term::Term::Bnode(RdfBNode {
            label: label.to_string(),
        }),
        Term::Variable(name) => rdf_term::Term::Variable(RdfVar { name: name.to_string() }),
        Term::Any => rdf_term::Term::Any(RdfAny {}),
        Term::Triple(triple) => rdf_term::Term::TripleTerm(Box::new(RdfTriple {
            s: Some(to_wire_at(&triple.subject, prefixes, allow_values, depth + 1)?),
            p: Some(to_wire_at(&triple.predicate, prefixes, allow_values, depth + 1)?),
            o: Some(to_wire_at(&triple.object, prefixes, allow_values, depth + 1)?),
        })),
        Term::Literal(lit) => {
            let value = match lit.kind() {
                LiteralKind::Typed(datatype) if allow_values => value_to_wire(lit.lexical(), datatype),
                _ => None,
            };
            match value {
                Some(value) => value,
                None => {
                    let kind = match lit.kind() {
                        LiteralKind::Simple => rdf_literal::LiteralKind::Simple(true),
                        LiteralKind::Lang(tag) => rdf_literal::LiteralKind::Langtag(tag.to_string()),
                        LiteralKind::Typed(datatype) => match iri_to_wire(datatype, prefixes) {
                            rdf_term::Term::PrefixName(name) => rdf_literal::LiteralKind::DtPrefix(name),
                            _ => rdf_literal::LiteralKind::Datatype(datatype.to_string()),
                        },
                    };
                    rdf_term::Term::Literal(RdfLiteral {
                        lex: lit.lexical().to_owned(),
                        literal_kind: Some(kind),
                    })
                }
            }
        }
    };
    Ok(RdfTerm { term: Some(wire) })
}

/// Encodes an optional term; `None` becomes the explicit undefined marker.
pub fn to_wire_opt(term: Option<&Term>, prefixes: Option<&PrefixMap>, allow_values: bool) -> Result<RdfTerm> {
    match term {
        Some(term) => to_wire(term, prefixes, allow_values),
        None => Ok(RdfTerm {
            term: Some(rdf_term::Term::Undefined(RdfUndef {})),
        }),
    }
}

/// Decodes a wire term. Prefixed names need `prefixes`.
pub fn from_wire(wire: &RdfTerm, prefixes: Option<&PrefixMap>) -> Result<Term> {
    Decoding {
        prefixes,
        intern: &mut |iri: &str| Arc::from(iri),
    }
    .term(wire, 0)
}

/// Like [`from_wire`], mapping the undefined marker to `None`.
pub fn from_wire_opt(wire: &RdfTerm, prefixes: Option<&PrefixMap>) -> Result<Option<Term>> {
    if is_undefined(wire) {
        return Ok(None);
    }
    from_wire(wire, prefixes).map(Some)
}

fn is_undefined(wire: &RdfTerm) -> bool {
    matches!(wire.term, Some(rdf_term::Term::Undefined(_)))
}

pub fn triple_to_wire(triple: &Triple, prefixes: Option<&PrefixMap>, allow_values: bool) -> Result<RdfTriple> {
    Ok(RdfTriple {
        s: Some(to_wire(&triple.subject, prefixes, allow_values)?),
        p: Some(to_wire(&triple.predicate, prefixes, allow_values)?),
        o: Some(to_wire(&triple.object, prefixes, allow_values)?),
    })
}

pub fn quad_to_wire(quad: &Quad, prefixes: Option<&PrefixMap>, allow_values: bool) -> Result<RdfQuad> {
    Ok(RdfQuad {
        s: Some(to_wire(&quad.subject, prefixes, allow_values)?),
        p: Some(to_wire(&quad.predicate, prefixes, allow_values)?),
        o: Some(to_wire(&quad.object, prefixes, allow_values)?),
        g: Some(to_wire(&quad.graph, prefixes, allow_values)?),
    })
}

pub fn triple_from_wire(wire: &RdfTriple, prefixes: Option<&PrefixMap>) -> Result<Triple> {
    Decoding {
        prefixes,
        intern: &mut |iri: &str| Arc::from(iri),
    }
    .triple(wire, 0)
}

pub fn quad_from_wire(wire: &RdfQuad, prefixes: Option<&PrefixMap>) -> Result<Quad> {
    Decoding {
        prefixes,
        intern: &mut |iri: &str| Arc::from(iri),
    }
    .quad(wire)
}

/// One decoding pass: the prefix map plus how IRI strings are allocated.
struct Decoding<'a> {
    prefixes: Option<&'a PrefixMap>,
    intern: &'a mut dyn FnMut(&str) -> Arc<str>,
}

fn part<'w>(slot: &'w Option<RdfTerm>, name: &'static str) -> Result<&'w RdfTerm> {
    slot.as_ref()
        .ok_or_else(|| TdbError::encoding(format!("wire tuple has no {name}")))
}

impl Decoding<'_> {
    fn expand(&mut self, name: &RdfPrefixName) -> Result<Arc<str>> {
        let map = self
            .prefixes
            .ok_or_else(|| TdbError::UnknownPrefix(name.prefix.clone()))?;
        let iri = map.expand(&name.prefix, &name.local_name)?;
        Ok((self.intern)(&iri))
    }

    fn term(&mut self, wire: &RdfTerm, depth: usize) -> Result<Term> {
        if depth > MAX_DEPTH {
            return Err(TdbError::encoding("quoted triples nested too deeply"));
        }
        let Some(term) = &wire.term else {
            return Err(TdbError::encoding("wire term is empty"));
        };
        Ok(match term {
            rdf_term::Term::Iri(iri) => Term::Iri((self.intern)(&iri.iri)),
            rdf_term::Term::PrefixName(name) => Term::Iri(self.expand(name)?),
            rdf_term::Term::Bnode(node) => Term::blank(node.label.as_str()),
            rdf_term::Term::Variable(var) => Term::variable(var.name.as_str()),
            rdf_term::Term::Any(_) => Term::Any,
            rdf_term::Term::Literal(lit) => match &lit.literal_kind {
                None | Some(rdf_literal::LiteralKind::Simple(_)) => Term::literal(lit.lex.as_str()),
                Some(rdf_literal::LiteralKind::Langtag(tag)) => Term::lang_literal(lit.lex.as_str(), tag.as_str()),
                Some(rdf_literal::LiteralKind::Datatype(datatype)) => {
                    Term::typed_literal(lit.lex.as_str(), (self.intern)(datatype))
                }
                Some(rdf_literal::LiteralKind::DtPrefix(name)) => {
                    Term::typed_literal(lit.lex.as_str(), self.expand(name)?)
                }
            },
            rdf_term::Term::ValInteger(value) => Term::typed_literal(value.to_string(), vocab::XSD_INTEGER),
            rdf_term::Term::ValDecimal(decimal) => {
                Term::typed_literal(format_decimal(decimal.value, decimal.scale), vocab::XSD_DECIMAL)
            }
            rdf_term::Term::ValDouble(value) => Term::typed_literal(format_double(*value), vocab::XSD_DOUBLE),
            rdf_term::Term::TripleTerm(triple) => Term::triple(self.triple(triple, depth + 1)?),
            rdf_term::Term::Undefined(_) => return Err(TdbError::encoding("undefined term where a term is required")),
            rdf_term::Term::Repeat(_) => return Err(TdbError::encoding("repeat marker is not supported")),
        })
    }

    fn triple(&mut self, wire: &RdfTriple, depth: usize) -> Result<Triple> {
        Ok(Triple::new(
            self.term(part(&wire.s, "subject")?, depth)?,
            self.term(part(&wire.p, "predicate")?, depth)?,
            self.term(part(&wire.o, "object")?, depth)?,
        ))
    }

    fn quad(&mut self, wire: &RdfQuad) -> Result<Quad> {
        let graph = match &wire.g {
            Some(g) => self.term(g, 0)?,
            None => Term::default_graph(),
        };
        Ok(Quad::new(
            graph,
            self.term(part(&wire.s, "subject")?, 0)?,
            self.term(part(&wire.p, "predicate")?, 0)?,
            self.term(part(&wire.o, "object")?, 0)?,
        ))
    }
}

/// Stateful decoder for bulk input.
///
/// Keeps the prefix declarations seen so far and shares the allocation of
/// recently decoded IRIs through an LRU cache.
pub struct TermDecoder {
    prefixes: PrefixMap,
    iris: LruCache<String, Arc<str>>,
}

impl Default for TermDecoder {
    fn default() -> Self {
        Self::new(PrefixMap::new())
    }
}

impl TermDecoder {
    pub fn new(prefixes: PrefixMap) -> Self {
        Self::with_capacity(prefixes, DEFAULT_IRI_CACHE)
    }

    /// Decoder caching up to `capacity` IRIs (at least one).
    pub fn with_capacity(prefixes: PrefixMap, capacity: usize) -> Self {
        Self {
            prefixes,
            iris: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn prefixes(&self) -> &PrefixMap {
        &self.prefixes
    }

    pub fn prefixes_mut(&mut self) -> &mut PrefixMap {
        &mut self.prefixes
    }

    /// IRIs currently cached.
    pub fn cached_iris(&self) -> usize {
        self.iris.len()
    }

    fn with_decoding<T>(&mut self, f: impl FnOnce(&mut Decoding<'_>) -> Result<T>) -> Result<T> {
        let iris = &mut self.iris;
        let mut intern = |iri: &str| -> Arc<str> {
            if let Some(shared) = iris.get(iri) {
                return Arc::clone(shared);
            }
            let shared: Arc<str> = Arc::from(iri);
            iris.put(iri.to_owned(), Arc::clone(&shared));
            trace!(iri, "term_decoder.intern");
            shared
        };
        f(&mut Decoding {
            prefixes: Some(&self.prefixes),
            intern: &mut intern,
        })
    }

    pub fn term(&mut self, wire: &RdfTerm) -> Result<Term> {
        self.with_decoding(|d| d.term(wire, 0))
    }

    /// Decodes a term that may be the undefined marker.
    pub fn term_opt(&mut self, wire: &RdfTerm) -> Result<Option<Term>> {
        if is_undefined(wire) {
            return Ok(None);
        }
        self.term(wire).map(Some)
    }

    pub fn triple(&mut self, wire: &RdfTriple) -> Result<Triple> {
        self.with_decoding(|d| d.triple(wire, 0))
    }

    pub fn quad(&mut self, wire: &RdfQuad) -> Result<Quad> {
        self.with_decoding(|d| d.quad(wire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(term: &Term, allow_values: bool) -> Term {
        from_wire(&to_wire(term, None, allow_values).unwrap(), None).unwrap()
    }

    #[test]
    fn integer_family_is_normalized() {
        let int = Term::typed_literal("+007", vocab::XSD_INT);
        let wire = to_wire(&int, None, true).unwrap();
        assert_eq!(wire.term, Some(rdf_term::Term::ValInteger(7)));
        assert_eq!(round(&int, true), Term::typed_literal("7", vocab::XSD_INTEGER));
        assert_eq!(round(&int, false), int);

        let too_big = Term::typed_literal("300", vocab::XSD_BYTE);
        assert!(matches!(to_wire(&too_big, None, true).unwrap().term, Some(rdf_term::Term::Literal(_))));
        let huge = Term::typed_literal("99999999999999999999", vocab::XSD_INTEGER);
        assert_eq!(round(&huge, true), huge);
    }

    #[test]
    fn decimals_and_doubles() {
        let dec = Term::typed_literal("-12.50", vocab::XSD_DECIMAL);
        let wire = to_wire(&dec, None, true).unwrap();
        assert_eq!(
            wire.term,
            Some(rdf_term::Term::ValDecimal(RdfDecimal { value: -1250, scale: 2 }))
        );
        assert_eq!(round(&dec, true), dec);

        let dbl = Term::typed_literal("150", vocab::XSD_DOUBLE);
        assert_eq!(round(&dbl, true), Term::typed_literal("1.5E2", vocab::XSD_DOUBLE));
        assert_eq!(round(&Term::typed_literal("-INF", vocab::XSD_DOUBLE), true).as_literal().unwrap().lexical(), "-INF");
        let junk = Term::typed_literal("infinity", vocab::XSD_DOUBLE);
        assert_eq!(round(&junk, true), junk);
    }

    #[test]
    fn double_formatting() {
        assert_eq!(format_double(1.0), "1.0E0");
        assert_eq!(format_double(0.015), "1.5E-2");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::INFINITY), "INF");
    }

    #[test]
    fn prefixes_abbreviate_iris_and_datatypes() {
        let map: PrefixMap = [("ex", "http://example/"), ("xsd", vocab::XSD)].into_iter().collect();
        let iri = Term::iri("http://example/thing");
        let wire = to_wire(&iri, Some(&map), false).unwrap();
        assert!(matches!(&wire.term, Some(rdf_term::Term::PrefixName(n)) if n.prefix == "ex" && n.local_name == "thing"));
        assert_eq!(from_wire(&wire, Some(&map)).unwrap(), iri);
        assert!(matches!(from_wire(&wire, None), Err(TdbError::UnknownPrefix(_))));

        let date = Term::typed_literal("2024-01-01", format!("{}date", vocab::XSD));
        let wire = to_wire(&date, Some(&map), true).unwrap();
        assert!(matches!(
            &wire.term,
            Some(rdf_term::Term::Literal(RdfLiteral { literal_kind: Some(rdf_literal::LiteralKind::DtPrefix(_)), .. }))
        ));
        assert_eq!(from_wire(&wire, Some(&map)).unwrap(), date);
    }

    #[test]
    fn structural_terms() {
        let nested = Term::triple(Triple::new(
            Term::blank("b0"),
            Term::iri("http://example/p"),
            Term::lang_literal("chat", "fr"),
        ));
        assert_eq!(round(&nested, true), nested);
        assert_eq!(round(&Term::Any, true), Term::Any);
        assert_eq!(round(&Term::variable("x"), true), Term::variable("x"));

        let undef = to_wire_opt(None, None, true).unwrap();
        assert_eq!(from_wire_opt(&undef, None).unwrap(), None);
        assert!(from_wire(&undef, None).is_err());
        assert!(from_wire(&RdfTerm::default(), None).is_err());
    }

    #[test]
    fn decoder_interns_iris() {
        let mut decoder = TermDecoder::with_capacity(PrefixMap::new(), 2);
        let wire = to_wire(&Term::iri("http://example/a"), None, false).unwrap();
        let (Term::Iri(a), Term::Iri(b)) = (decoder.term(&wire).unwrap(), decoder.term(&wire).unwrap()) else {
            panic!("expected IRIs");
        };
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(decoder.cached_iris(), 1);
    }
}
