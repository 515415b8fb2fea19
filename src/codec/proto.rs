//! Binary RDF protobuf messages.
//!
//! Hand-written `prost` definitions; field numbers follow the binary RDF
//! schema so the bytes interoperate with other readers of that format.
#![allow(missing_docs)]

/// Full IRI.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfIri {
    #[prost(string, tag = "1")]
    pub iri: String,
}

/// IRI abbreviated through a prefix map.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfPrefixName {
    #[prost(string, tag = "1")]
    pub prefix: String,
    #[prost(string, tag = "2")]
    pub local_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfBNode {
    #[prost(string, tag = "1")]
    pub label: String,
}

/// Literal that was not sent as a compact value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfLiteral {
    #[prost(string, tag = "1")]
    pub lex: String,
    #[prost(oneof = "rdf_literal::LiteralKind", tags = "9, 2, 3, 4")]
    pub literal_kind: Option<rdf_literal::LiteralKind>,
}

pub mod rdf_literal {
    /// How the lexical form is qualified.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum LiteralKind {
        #[prost(bool, tag = "9")]
        Simple(bool),
        #[prost(string, tag = "2")]
        Langtag(String),
        #[prost(string, tag = "3")]
        Datatype(String),
        #[prost(message, tag = "4")]
        DtPrefix(super::RdfPrefixName),
    }
}

/// Decimal as `value * 10^-scale`.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RdfDecimal {
    #[prost(sint64, tag = "1")]
    pub value: i64,
    #[prost(sint32, tag = "2")]
    pub scale: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfVar {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RdfAny {}

/// Explicit absence, e.g. an unbound variable in a result row.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RdfUndef {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RdfRepeat {}

/// One RDF term.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfTerm {
    #[prost(oneof = "rdf_term::Term", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 20, 21, 22")]
    pub term: Option<rdf_term::Term>,
}

pub mod rdf_term {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Term {
        #[prost(message, tag = "1")]
        Iri(super::RdfIri),
        #[prost(message, tag = "2")]
        Bnode(super::RdfBNode),
        #[prost(message, tag = "3")]
        Literal(super::RdfLiteral),
        #[prost(message, tag = "4")]
        PrefixName(super::RdfPrefixName),
        #[prost(message, tag = "5")]
        Variable(super::RdfVar),
        #[prost(message, tag = "6")]
        TripleTerm(Box<super::RdfTriple>),
        #[prost(message, tag = "7")]
        Any(super::RdfAny),
        #[prost(message, tag = "8")]
        Undefined(super::RdfUndef),
        #[prost(message, tag = "9")]
        Repeat(super::RdfRepeat),
        #[prost(sint64, tag = "20")]
        ValInteger(i64),
        #[prost(double, tag = "21")]
        ValDouble(f64),
        #[prost(message, tag = "22")]
        ValDecimal(super::RdfDecimal),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfTriple {
    #[prost(message, optional, tag = "1")]
    pub s: Option<RdfTerm>,
    #[prost(message, optional, tag = "2")]
    pub p: Option<RdfTerm>,
    #[prost(message, optional, tag = "3")]
    pub o: Option<RdfTerm>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfQuad {
    #[prost(message, optional, tag = "1")]
    pub s: Option<RdfTerm>,
    #[prost(message, optional, tag = "2")]
    pub p: Option<RdfTerm>,
    #[prost(message, optional, tag = "3")]
    pub o: Option<RdfTerm>,
    #[prost(message, optional, tag = "4")]
    pub g: Option<RdfTerm>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfPrefixDecl {
    #[prost(string, tag = "1")]
    pub prefix: String,
    #[prost(string, tag = "2")]
    pub uri: String,
}

/// One row of an RDF stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfStreamRow {
    #[prost(oneof = "rdf_stream_row::Row", tags = "1, 2, 3, 4")]
    pub row: Option<rdf_stream_row::Row>,
}

pub mod rdf_stream_row {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Row {
        #[prost(message, tag = "1")]
        PrefixDecl(super::RdfPrefixDecl),
        #[prost(message, tag = "2")]
        Triple(super::RdfTriple),
        #[prost(message, tag = "3")]
        Quad(super::RdfQuad),
        #[prost(message, tag = "4")]
        Base(super::RdfIri),
    }
}

/// A whole stream as one message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfStream {
    #[prost(message, repeated, tag = "1")]
    pub row: Vec<RdfStreamRow>,
}

/// Header of a result-row stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfVarTuple {
    #[prost(message, repeated, tag = "1")]
    pub vars: Vec<RdfVar>,
}

/// One result row; unbound positions are `Undefined`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RdfDataTuple {
    #[prost(message, repeated, tag = "1")]
    pub row: Vec<RdfTerm>,
}
