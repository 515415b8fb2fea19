//! tdbx: a transactional RDF triple and quad store with a protobuf binary
//! term codec.
//!
//! Terms are interned into a node table and addressed by [`NodeId`]; triples,
//! quads and prefix declarations are kept in multi-index tuple tables.
//! Writers commit through a journal; readers see a fixed snapshot.
//!
//! ```no_run
//! use tdbx::{Store, Term, Triple};
//!
//! # fn main() -> tdbx::Result<()> {
//! let store = Store::open_dir("/tmp/tdbx-demo")?;
//! store.write(|txn| {
//!     txn.add_triple(&Triple::new(
//!         Term::iri("http://example/s"),
//!         Term::iri("http://example/p"),
//!         Term::literal("o"),
//!     ))
//! })?;
//! let count = store.read(|txn| txn.triple_count())?;
//! assert_eq!(count, 1);
//! store.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod codec;
pub mod model;
pub mod primitives;
pub mod storage;
pub mod store;
pub mod txn;
pub mod types;

pub use model::{Literal, Quad, Term, Triple};
pub use store::{Store, StoreParams};
pub use txn::{ExclusiveMode, Transaction, TxnMode, TxnState, WritersBlocked};
pub use types::{NodeId, NodeIdRef, Result, TdbError, TxnError, TxnId};
