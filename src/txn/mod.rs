//! Transactions: journaled commit of node and tuple changes with
//! snapshot-isolated readers and a single writer.
//!
//! A write transaction buffers new terms in a [`NodeTableTrans`] overlay and
//! tuple changes in private copies of the tuple tables. Commit runs in three
//! phases:
//!
//! 1. *prepare* journals the new objects, the tuple changes, a state buffer
//!    and a commit marker, then syncs the journal;
//! 2. *enact* appends the objects to the shared node table and publishes a
//!    new [`StoreView`](crate::store::StoreView);
//! 3. *clearup* drops the overlays, checkpoints when the journal has grown
//!    past its threshold and releases the writer permit.
//!
//! Readers pin the view that was current when they began. A reader begun
//! in one of the promotable modes can later become the writer; see
//! [`Transaction::promote`]. [`WritersBlocked`] holds writers off while
//! readers carry on, and [`ExclusiveMode`] waits out every transaction and
//! keeps new ones from starting.

use std::fmt;

use crate::primitives::journal::Journal;
use crate::types::{Result, TxnId};

mod manager;
mod node_trans;
mod object_trans;
mod transaction;

pub use manager::{
    CommitSettings, ExclusiveMode, TransactionManager, TxnCounters, TxnCountersSnapshot, WritersBlocked,
};
pub use node_trans::NodeTableTrans;
pub use object_trans::ObjectFileTrans;
pub use transaction::Transaction;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnMode {
    /// Sees a fixed snapshot; never blocks.
    Read,
    /// Exclusive writer.
    Write,
    /// Reader that may promote to a writer only while no other writer has
    /// committed since it began.
    ReadPromote,
    /// Reader that may always promote; promotion moves it to the latest
    /// committed view.
    ReadCommittedPromote,
}

impl TxnMode {
    /// Returns true for the writer mode.
    pub fn is_write(self) -> bool {
        self == TxnMode::Write
    }

    /// Returns true for the modes [`Transaction::promote`] accepts.
    pub fn is_promotable(self) -> bool {
        matches!(self, TxnMode::ReadPromote | TxnMode::ReadCommittedPromote)
    }

    /// Lower-case name used in errors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TxnMode::Read => "read",
            TxnMode::Write => "write",
            TxnMode::ReadPromote => "read-promote",
            TxnMode::ReadCommittedPromote => "read-committed-promote",
        }
    }
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a transaction in the commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Journaled and synced; not yet visible.
    Prepared,
    /// Applied and visible to new transactions.
    Enacted,
    /// Finished successfully.
    Committed,
    /// Rolled back.
    Aborted,
    /// A journal write failed during prepare; only abort is accepted.
    Failed,
}

impl TxnState {
    /// Lower-case name used in errors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TxnState::Active => "active",
            TxnState::Prepared => "prepared",
            TxnState::Enacted => "enacted",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
            TxnState::Failed => "failed",
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component that takes part in the commit protocol.
///
/// Implementations use interior mutability because they are shared with the
/// readers of the transaction they belong to.
pub trait TransactionLifecycle {
    /// Starts buffering changes for `txn`.
    fn begin(&self, txn: TxnId) -> Result<()>;
    /// Writes buffered changes to the journal.
    fn commit_prepare(&self, txn: TxnId, journal: &Journal) -> Result<()>;
    /// Applies buffered changes to the shared structures.
    fn commit_enact(&self, txn: TxnId) -> Result<()>;
    /// Discards transaction-local state after a commit.
    fn commit_clearup(&self, txn: TxnId) -> Result<()>;
    /// Discards transaction-local state without applying it.
    fn abort(&self, txn: TxnId) -> Result<()>;
}
