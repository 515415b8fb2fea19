#![forbid(unsafe_code)]
//! RDF terms, triples and quads.

use std::fmt;
use std::sync::Arc;

/// Well-known datatype and graph IRIs.
pub mod vocab {
    /// XML Schema namespace.
    pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
    /// `xsd:string`.
    pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    /// `xsd:integer`.
    pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    /// `xsd:long`.
    pub const XSD_LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
    /// `xsd:int`.
    pub const XSD_INT: &str = "http://www.w3.org/2001/XMLSchema#int";
    /// `xsd:short`.
    pub const XSD_SHORT: &str = "http://www.w3.org/2001/XMLSchema#short";
    /// `xsd:byte`.
    pub const XSD_BYTE: &str = "http://www.w3.org/2001/XMLSchema#byte";
    /// `xsd:decimal`.
    pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    /// `xsd:double`.
    pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    /// `xsd:boolean`.
    pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    /// `rdf:langString`.
    pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
    /// Name of the default graph when it appears in quad position.
    pub const DEFAULT_GRAPH: &str = "urn:x-arq:DefaultGraph";
}

/// How a literal's lexical form is qualified.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LiteralKind {
    /// Plain string literal (`xsd:string`).
    Simple,
    /// Language-tagged string.
    Lang(Arc<str>),
    /// Literal with an explicit datatype other than `xsd:string`.
    Typed(Arc<str>),
}

/// An RDF literal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    lexical: Arc<str>,
    kind: LiteralKind,
}

impl Literal {
    /// A simple string literal.
    pub fn simple(lexical: impl Into<Arc<str>>) -> Self {
        Self {
            lexical: lexical.into(),
            kind: LiteralKind::Simple,
        }
    }

    /// A language-tagged literal.
    pub fn lang(lexical: impl Into<Arc<str>>, tag: impl Into<Arc<str>>) -> Self {
        Self {
            lexical: lexical.into(),
            kind: LiteralKind::Lang(tag.into()),
        }
    }

    /// A typed literal. `xsd:string` collapses to a simple literal.
    pub fn typed(lexical: impl Into<Arc<str>>, datatype: impl Into<Arc<str>>) -> Self {
        let datatype = datatype.into();
        let kind = if &*datatype == vocab::XSD_STRING {
            LiteralKind::Simple
        } else {
            LiteralKind::Typed(datatype)
        };
        Self {
            lexical: lexical.into(),
            kind,
        }
    }

    /// Lexical form.
    pub fn lexical(&self) -> &str {
        &self.lexical
    }

    /// Qualifier of the lexical form.
    pub fn kind(&self) -> &LiteralKind {
        &self.kind
    }

    /// Language tag, if any.
    pub fn language(&self) -> Option<&str> {
        match &self.kind {
            LiteralKind::Lang(tag) => Some(tag),
            _ => None,
        }
    }

    /// Effective datatype IRI.
    pub fn datatype(&self) -> &str {
        match &self.kind {
            LiteralKind::Simple => vocab::XSD_STRING,
            LiteralKind::Lang(_) => vocab::RDF_LANG_STRING,
            LiteralKind::Typed(dt) => dt,
        }
    }
}

/// An RDF term.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// IRI reference.
    Iri(Arc<str>),
    /// Blank node with its label.
    Blank(Arc<str>),
    /// Literal value.
    Literal(Literal),
    /// Query variable.
    Variable(Arc<str>),
    /// Quoted triple (RDF-star).
    Triple(Box<Triple>),
    /// Wildcard used in patterns; never stored.
    Any,
}

impl Term {
    /// Builds an IRI term.
    pub fn iri(iri: impl Into<Arc<str>>) -> Self {
        Term::Iri(iri.into())
    }

    /// Builds a blank node term.
    pub fn blank(label: impl Into<Arc<str>>) -> Self {
        Term::Blank(label.into())
    }

    /// Builds a simple literal term.
    pub fn literal(lexical: impl Into<Arc<str>>) -> Self {
        Term::Literal(Literal::simple(lexical))
    }

    /// Builds a language-tagged literal term.
    pub fn lang_literal(lexical: impl Into<Arc<str>>, tag: impl Into<Arc<str>>) -> Self {
        Term::Literal(Literal::lang(lexical, tag))
    }

    /// Builds a typed literal term.
    pub fn typed_literal(lexical: impl Into<Arc<str>>, datatype: impl Into<Arc<str>>) -> Self {
        Term::Literal(Literal::typed(lexical, datatype))
    }

    /// Builds a variable term.
    pub fn variable(name: impl Into<Arc<str>>) -> Self {
        Term::Variable(name.into())
    }

    /// Builds a quoted triple term.
    pub fn triple(triple: Triple) -> Self {
        Term::Triple(Box::new(triple))
    }

    /// The default graph name.
    pub fn default_graph() -> Self {
        Term::iri(vocab::DEFAULT_GRAPH)
    }

    /// Returns true for the wildcard.
    pub fn is_any(&self) -> bool {
        matches!(self, Term::Any)
    }

    /// Returns true if this names the default graph.
    pub fn is_default_graph(&self) -> bool {
        matches!(self, Term::Iri(iri) if &**iri == vocab::DEFAULT_GRAPH)
    }

    /// Returns the IRI string for IRI terms.
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// Returns the literal for literal terms.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal(lit) => match lit.kind() {
                LiteralKind::Simple => write!(f, "{:?}", lit.lexical()),
                LiteralKind::Lang(tag) => write!(f, "{:?}@{tag}", lit.lexical()),
                LiteralKind::Typed(dt) => write!(f, "{:?}^^<{dt}>", lit.lexical()),
            },
            Term::Variable(name) => write!(f, "?{name}"),
            Term::Triple(t) => write!(f, "<< {} {} {} >>", t.subject, t.predicate, t.object),
            Term::Any => f.write_str("ANY"),
        }
    }
}

/// A subject-predicate-object statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    /// Subject.
    pub subject: Term,
    /// Predicate.
    pub predicate: Term,
    /// Object.
    pub object: Term,
}

impl Triple {
    /// Builds a triple.
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Terms in S, P, O order.
    pub fn terms(&self) -> [&Term; 3] {
        [&self.subject, &self.predicate, &self.object]
    }
}

/// A triple qualified by a graph name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quad {
    /// Graph name.
    pub graph: Term,
    /// Subject.
    pub subject: Term,
    /// Predicate.
    pub predicate: Term,
    /// Object.
    pub object: Term,
}

impl Quad {
    /// Builds a quad.
    pub fn new(graph: Term, subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            graph,
            subject,
            predicate,
            object,
        }
    }

    /// A quad in the default graph.
    pub fn in_default_graph(triple: Triple) -> Self {
        Self::new(
            Term::default_graph(),
            triple.subject,
            triple.predicate,
            triple.object,
        )
    }

    /// Terms in G, S, P, O order.
    pub fn terms(&self) -> [&Term; 4] {
        [&self.graph, &self.subject, &self.predicate, &self.object]
    }

    /// Drops the graph name.
    pub fn into_triple(self) -> Triple {
        Triple::new(self.subject, self.predicate, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xsd_string_collapses_to_simple() {
        let a = Term::typed_literal("abc", vocab::XSD_STRING);
        let b = Term::literal("abc");
        assert_eq!(a, b);
        assert_eq!(b.as_literal().unwrap().datatype(), vocab::XSD_STRING);
    }

    #[test]
    fn lang_literal_reports_lang_string() {
        let lit = Literal::lang("chat", "fr");
        assert_eq!(lit.language(), Some("fr"));
        assert_eq!(lit.datatype(), vocab::RDF_LANG_STRING);
    }

    #[test]
    fn default_graph_detection() {
        assert!(Term::default_graph().is_default_graph());
        assert!(!Term::iri("http://example/g").is_default_graph());
    }
}
