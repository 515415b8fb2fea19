//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, positioned I/O, the single-writer gate, the
//! append-only object file and the transaction journal.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Single-writer coordination.
pub mod concurrency;

/// I/O abstractions and store locations.
pub mod io;

/// Write-ahead transaction journal.
///
/// Committed transactions are made durable here before they are applied.
pub mod journal;

/// Append-only blob storage addressed by offset.
pub mod objectfile;
