#![forbid(unsafe_code)]
//! Literal values packed directly into a [`NodeId`].
//!
//! Integers, decimals and booleans in canonical form never reach the object
//! file: their value travels in the low 56 bits of the id.

use tracing::trace;

use super::{NodeIter, NodeTable};
use crate::model::{vocab, LiteralKind, Term};
use crate::types::{NodeId, NodeIdRef, Result};

const KIND_INTEGER: u8 = 1;
const KIND_DECIMAL: u8 = 2;
const KIND_BOOLEAN: u8 = 3;

const INT_BITS: u32 = 56;
const DECIMAL_BITS: u32 = 48;

fn fits_signed(v: i64, bits: u32) -> bool {
    let bound = 1i64 << (bits - 1);
    (-bound..bound).contains(&v)
}

fn sign_extend(payload: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((payload << shift) as i64) >> shift
}

fn low_bits(v: i64, bits: u32) -> u64 {
    (v as u64) & ((1u64 << bits) - 1)
}

/// Plain decimal string of `unscaled * 10^-scale`, e.g. `(-5, 2)` is `"-0.05"`.
pub fn format_decimal(unscaled: i64, scale: i32) -> String {
    let negative = unscaled < 0;
    let digits = unscaled.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + 3);
    if negative {
        out.push('-');
    }
    if scale <= 0 {
        out.push_str(&digits);
        if unscaled != 0 {
            out.extend(std::iter::repeat('0').take(scale.unsigned_abs() as usize));
        }
        return out;
    }
    let scale = scale as usize;
    if digits.len() <= scale {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take(scale - digits.len()));
        out.push_str(&digits);
    } else {
        let (int, frac) = digits.split_at(digits.len() - scale);
        out.push_str(int);
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// Splits a decimal lexical form into `(unscaled, scale)`.
///
/// Accepts an optional sign, digits and an optional fraction. Returns `None`
/// when the form is malformed or the unscaled value overflows `i64`.
pub fn parse_decimal(lexical: &str) -> Option<(i64, i32)> {
    let (negative, body) = match lexical.as_bytes().first()? {
        b'-' => (true, &lexical[1..]),
        b'+' => (false, &lexical[1..]),
        _ => (false, lexical),
    };
    let (int, frac) = match body.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (body, ""),
    };
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut unscaled: i64 = 0;
    for b in int.bytes().chain(frac.bytes()) {
        unscaled = unscaled.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }
    let scale = i32::try_from(frac.len()).ok()?;
    Some((if negative { -unscaled } else { unscaled }, scale))
}

/// Packs `term` into an inline id, if it is a value literal in canonical form.
pub fn encode(term: &Term) -> Option<NodeId> {
    let lit = term.as_literal()?;
    let LiteralKind::Typed(datatype) = lit.kind() else {
        return None;
    };
    let lexical = lit.lexical();
    match &**datatype {
        vocab::XSD_INTEGER => {
            let v: i64 = lexical.parse().ok()?;
            (fits_signed(v, INT_BITS) && v.to_string() == lexical)
                .then(|| NodeId::inline(KIND_INTEGER, low_bits(v, INT_BITS)))
        }
        vocab::XSD_DECIMAL => {
            let (unscaled, scale) = parse_decimal(lexical)?;
            let scale = u8::try_from(scale).ok()?;
            if !fits_signed(unscaled, DECIMAL_BITS) || format_decimal(unscaled, i32::from(scale)) != lexical {
                return None;
            }
            let payload = (u64::from(scale) << DECIMAL_BITS) | low_bits(unscaled, DECIMAL_BITS);
            Some(NodeId::inline(KIND_DECIMAL, payload))
        }
        vocab::XSD_BOOLEAN => match lexical {
            "true" => Some(NodeId::inline(KIND_BOOLEAN, 1)),
            "false" => Some(NodeId::inline(KIND_BOOLEAN, 0)),
            _ => None,
        },
        _ => None,
    }
}

/// Unpacks an inline id; `None` for offsets and unknown kinds.
pub fn decode(id: NodeId) -> Option<Term> {
    if !id.is_inline() {
        return None;
    }
    let payload = id.inline_payload();
    match id.inline_kind() {
        KIND_INTEGER => Some(Term::typed_literal(
            sign_extend(payload, INT_BITS).to_string(),
            vocab::XSD_INTEGER,
        )),
        KIND_DECIMAL => {
            let scale = (payload >> DECIMAL_BITS) as i32;
            let unscaled = sign_extend(payload & ((1 << DECIMAL_BITS) - 1), DECIMAL_BITS);
            Some(Term::typed_literal(format_decimal(unscaled, scale), vocab::XSD_DECIMAL))
        }
        KIND_BOOLEAN => Some(Term::typed_literal(
            if payload == 1 { "true" } else { "false" },
            vocab::XSD_BOOLEAN,
        )),
        _ => None,
    }
}

/// Node table layer that answers inline values itself.
pub struct NodeTableInline<T> {
    base: T,
}

impl<T: NodeTable> NodeTableInline<T> {
    pub fn new(base: T) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &T {
        &self.base
    }
}

impl<T: NodeTable> NodeTable for NodeTableInline<T> {
    fn get_alloc_node_id(&self, term: &Term) -> Result<NodeId> {
        if let Some(id) = encode(term) {
            trace!(%id, "node_table.alloc.inline");
            return Ok(id);
        }
        self.base.get_alloc_node_id(term)
    }

    fn get_node_id_for_node(&self, term: &Term) -> Result<NodeIdRef> {
        match encode(term) {
            Some(id) => Ok(NodeIdRef::Concrete(id)),
            None => self.base.get_node_id_for_node(term),
        }
    }

    fn get_node_for_node_id(&self, id: NodeId) -> Result<Option<Term>> {
        if id.is_inline() {
            return Ok(decode(id));
        }
        self.base.get_node_for_node_id(id)
    }

    fn all(&self) -> Result<NodeIter> {
        self.base.all()
    }

    fn limit(&self) -> u64 {
        self.base.limit()
    }

    fn refresh(&self) -> Result<Vec<(NodeId, Term)>> {
        self.base.refresh()
    }

    fn sync(&self) -> Result<()> {
        self.base.sync()
    }

    fn close(&self) -> Result<()> {
        self.base.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::nodes::NodeTableNative;
    use proptest::prelude::*;

    #[test]
    fn canonical_values_inline() {
        for (lexical, datatype) in [
            ("0", vocab::XSD_INTEGER),
            ("-36028797018963968", vocab::XSD_INTEGER),
            ("36028797018963967", vocab::XSD_INTEGER),
            ("1.50", vocab::XSD_DECIMAL),
            ("-0.05", vocab::XSD_DECIMAL),
            ("12", vocab::XSD_DECIMAL),
            ("true", vocab::XSD_BOOLEAN),
            ("false", vocab::XSD_BOOLEAN),
        ] {
            let term = Term::typed_literal(lexical, datatype);
            let id = encode(&term).unwrap_or_else(|| panic!("{lexical} should inline"));
            assert!(id.is_inline());
            assert_eq!(decode(id), Some(term));
        }
    }

    #[test]
    fn non_canonical_or_wide_values_stay_out_of_line() {
        for (lexical, datatype) in [
            ("+7", vocab::XSD_INTEGER),
            ("007", vocab::XSD_INTEGER),
            ("36028797018963968", vocab::XSD_INTEGER),
            ("1.", vocab::XSD_DECIMAL),
            ("-0", vocab::XSD_DECIMAL),
            ("1", vocab::XSD_BOOLEAN),
            ("1.0e0", vocab::XSD_DOUBLE),
        ] {
            assert_eq!(encode(&Term::typed_literal(lexical, datatype)), None, "{lexical}");
        }
        assert_eq!(encode(&Term::literal("5")), None);
    }

    #[test]
    fn inline_terms_never_touch_the_object_file() -> Result<()> {
        let table = NodeTableInline::new(NodeTableNative::in_memory());
        let five = Term::typed_literal("5", vocab::XSD_INTEGER);
        let id = table.get_alloc_node_id(&five)?;
        assert!(id.is_inline());
        assert_eq!(table.limit(), 0);
        assert_eq!(table.get_node_id_for_node(&five)?, NodeIdRef::Concrete(id));
        assert_eq!(table.get_node_for_node_id(id)?, Some(five));

        let iri = table.get_alloc_node_id(&Term::iri("http://example/x"))?;
        assert!(!iri.is_inline());
        assert!(table.limit() > 0);
        Ok(())
    }

    #[test]
    fn decimal_formatting() {
        assert_eq!(format_decimal(150, 2), "1.50");
        assert_eq!(format_decimal(-5, 2), "-0.05");
        assert_eq!(format_decimal(12, -2), "1200");
        assert_eq!(format_decimal(0, 0), "0");
        assert_eq!(parse_decimal("+1.25"), Some((125, 2)));
        assert_eq!(parse_decimal(".5"), Some((5, 1)));
        assert_eq!(parse_decimal("1e3"), None);
        assert_eq!(parse_decimal("."), None);
    }

    proptest! {
        #[test]
        fn integers_in_range_roundtrip(v in -(1i64 << 55)..(1i64 << 55)) {
            let term = Term::typed_literal(v.to_string(), vocab::XSD_INTEGER);
            let id = encode(&term).unwrap();
            prop_assert_eq!(decode(id), Some(term));
        }
    }
}
