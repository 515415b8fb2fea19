#![forbid(unsafe_code)]
//! Core identifiers and the crate-wide error type.

use std::fmt;

pub mod checksum;

pub use checksum::{Checksum, Crc32Fast};

const INLINE_BIT: u64 = 1 << 63;
const KIND_SHIFT: u32 = 56;
const KIND_MASK: u64 = 0x7f;
const PAYLOAD_MASK: u64 = (1 << KIND_SHIFT) - 1;

/// Identifier of a stored RDF term.
///
/// A clear top bit means the id is the byte offset of the term's entry in the
/// node object file. A set top bit marks an inline value: the next seven bits
/// carry the value kind and the low 56 bits the payload.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Size of an encoded node id in bytes.
    pub const SIZE: usize = 8;

    /// Builds an id that refers to an object file offset.
    pub fn from_offset(offset: u64) -> Self {
        debug_assert!(offset & INLINE_BIT == 0, "offset collides with inline bit");
        NodeId(offset)
    }

    /// Builds an inline id from a value kind and a 56-bit payload.
    pub fn inline(kind: u8, payload: u64) -> Self {
        NodeId(INLINE_BIT | ((u64::from(kind) & KIND_MASK) << KIND_SHIFT) | (payload & PAYLOAD_MASK))
    }

    /// Returns true if the id encodes its value directly.
    pub fn is_inline(self) -> bool {
        self.0 & INLINE_BIT != 0
    }

    /// Object file offset of a non-inline id.
    pub fn offset(self) -> u64 {
        self.0 & !INLINE_BIT
    }

    /// Value kind of an inline id.
    pub fn inline_kind(self) -> u8 {
        ((self.0 >> KIND_SHIFT) & KIND_MASK) as u8
    }

    /// 56-bit payload of an inline id.
    pub fn inline_payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Big-endian encoding; byte order equals numeric order.
    pub fn to_be_bytes(self) -> [u8; Self::SIZE] {
        self.0.to_be_bytes()
    }

    /// Decodes an id written by [`NodeId::to_be_bytes`].
    pub fn from_be_slice(src: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::SIZE] = src
            .get(..Self::SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or(TdbError::Corruption("node id truncated"))?;
        Ok(NodeId(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inline() {
            write!(f, "[{}:{:#x}]", self.inline_kind(), self.inline_payload())
        } else {
            write!(f, "[{}]", self.0)
        }
    }
}

/// Result of looking a term up in a node table.
///
/// Wildcards and misses are explicit variants rather than reserved id values.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum NodeIdRef {
    /// The term is stored under this id.
    Concrete(NodeId),
    /// The term was the wildcard; it matches anything.
    Any,
    /// The term is not stored.
    Absent,
}

impl NodeIdRef {
    /// Returns the concrete id, if any.
    pub fn concrete(self) -> Option<NodeId> {
        match self {
            NodeIdRef::Concrete(id) => Some(id),
            NodeIdRef::Any | NodeIdRef::Absent => None,
        }
    }

    /// Returns true for [`NodeIdRef::Absent`].
    pub fn is_absent(self) -> bool {
        matches!(self, NodeIdRef::Absent)
    }
}

/// Transaction identifier, unique within a store instance.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Violations of the transaction protocol.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    /// A write was attempted inside a read transaction.
    #[error("write attempted in a read transaction")]
    ReadOnly,
    /// A non-blocking write begin found another writer active.
    #[error("another write transaction is active")]
    WriterActive,
    /// A non-blocking begin found the store in exclusive mode.
    #[error("the store is in exclusive mode")]
    Exclusive,
    /// `promote` was called on a transaction that was not begun as promotable.
    #[error("a {mode} transaction cannot be promoted")]
    NotPromotable {
        /// Mode the transaction was begun in.
        mode: &'static str,
    },
    /// A lifecycle step was called in the wrong state.
    #[error("cannot {op} a transaction in state {state}")]
    BadState {
        /// Operation that was attempted.
        op: &'static str,
        /// State the transaction was in.
        state: &'static str,
    },
}

/// Crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum TdbError {
    /// Underlying file system failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Stored data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Stored data failed validation at a known location.
    #[error("corruption in {file} at {offset}: {reason}")]
    CorruptionAt {
        /// Logical file name.
        file: String,
        /// Byte offset of the bad entry.
        offset: u64,
        /// What was wrong.
        reason: &'static str,
    },
    /// An object file read addressed no entry.
    #[error("{file}: no object at offset {offset}")]
    ObjectNotFound {
        /// Logical file name.
        file: String,
        /// Requested offset.
        offset: u64,
    },
    /// A term or payload could not be encoded or decoded.
    #[error("encoding: {0}")]
    Encoding(String),
    /// A protobuf message failed to decode.
    #[error("wire: {0}")]
    Wire(#[from] prost::DecodeError),
    /// A prefixed name used a prefix with no mapping.
    #[error("unknown prefix: {0}")]
    UnknownPrefix(String),
    /// A tuple's length did not match the index arity.
    #[error("arity mismatch: expected {expected}, got {actual}")]
    Arity {
        /// Arity of the index.
        expected: usize,
        /// Length supplied by the caller.
        actual: usize,
    },
    /// A column map description was not a permutation.
    #[error("invalid column map: {0}")]
    InvalidColumnMap(String),
    /// Two distinct terms share a node hash.
    #[error("node hash collision with entry at offset {offset}")]
    HashCollision {
        /// Offset of the stored term that shares the hash.
        offset: u64,
    },
    /// Invalid argument or configuration.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid argument with a formatted message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// The component was used after close.
    #[error("{0} is closed")]
    Closed(&'static str),
    /// The store parameter file could not be read or written.
    #[error("store params: {0}")]
    Params(#[from] serde_json::Error),
    /// Transaction protocol violation.
    #[error("transaction: {0}")]
    Txn(#[from] TxnError),
}

impl TdbError {
    /// Builds an [`TdbError::Encoding`] from any message.
    pub fn encoding(msg: impl Into<String>) -> Self {
        TdbError::Encoding(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TdbError>;
