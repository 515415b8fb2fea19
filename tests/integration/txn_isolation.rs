#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tdbx::model::{Quad, Term, Triple};
use tdbx::primitives::io::Location;
use tdbx::store::JOURNAL_FILE;
use tdbx::{NodeIdRef, Result, Store, StoreParams, TdbError, TxnError, TxnMode, TxnState};
use tempfile::TempDir;

fn triple(s: &str, p: &str, o: &str) -> Triple {
    Triple::new(
        Term::iri(format!("http://example/{s}")),
        Term::iri(format!("http://example/{p}")),
        Term::literal(o),
    )
}

fn copy_store(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}

#[test]
fn readers_keep_their_snapshot() -> Result<()> {
    let store = Store::in_memory()?;
    store.write(|txn| txn.add_triple(&triple("a", "p", "old")))?;
    assert_eq!(store.version(), 1);

    let reader = store.begin(TxnMode::Read)?;
    let fresh = triple("b", "q", "new");
    store.write(|txn| txn.add_triple(&fresh))?;
    assert_eq!(store.version(), 2);

    assert_eq!(reader.start_version(), 1);
    assert_eq!(reader.triple_count()?, 1);
    assert!(!reader.contains_triple(&fresh)?);
    assert_eq!(reader.node_id(&Term::iri("http://example/b"))?, NodeIdRef::Absent);
    reader.end()?;

    let later = store.begin(TxnMode::Read)?;
    assert_eq!(later.triple_count()?, 2);
    assert!(later.contains_triple(&fresh)?);
    assert!(matches!(later.node_id(&Term::iri("http://example/b"))?, NodeIdRef::Concrete(_)));
    Ok(())
}

#[test]
fn writer_sees_its_own_changes_before_commit() -> Result<()> {
    let store = Store::in_memory()?;
    let mut txn = store.begin(TxnMode::Write)?;
    let t = triple("s", "p", "o");
    assert!(txn.add_triple(&t)?);
    assert!(txn.contains_triple(&t)?);
    assert_eq!(txn.find_triples(None, None, Some(&Term::literal("o")))?.count(), 1);

    let outside = store.begin(TxnMode::Read)?;
    assert!(!outside.contains_triple(&t)?);
    txn.commit()?;
    assert!(!outside.contains_triple(&t)?);
    assert_eq!(txn.state(), TxnState::Committed);
    Ok(())
}

#[test]
fn abort_discards_everything() -> Result<()> {
    let store = Store::in_memory()?;
    let before = store.node_count();
    let mut txn = store.begin(TxnMode::Write)?;
    txn.add(&Quad::new(
        Term::iri("http://example/g"),
        Term::iri("http://example/s"),
        Term::iri("http://example/p"),
        Term::literal("gone"),
    ))?;
    txn.set_prefix(None, "ex", "http://example/")?;
    txn.abort()?;

    assert_eq!(store.version(), 0);
    assert_eq!(store.node_count(), before);
    store.read(|txn| {
        assert_eq!(txn.quad_count()?, 0);
        assert_eq!(txn.prefix(None, "ex")?, None);
        assert!(txn.node_id(&Term::literal("gone"))?.is_absent());
        Ok(())
    })?;
    assert_eq!(store.counters().aborted, 1);
    Ok(())
}

#[test]
fn empty_write_publishes_nothing() -> Result<()> {
    let store = Store::in_memory()?;
    store.write(|txn| txn.add_triple(&triple("a", "b", "c")))?;
    let journal_before = store.journal().stats().entries_appended;
    store.write(|txn| txn.contains_triple(&triple("a", "b", "c")))?;
    store.write(|txn| txn.add_triple(&triple("a", "b", "c")))?;
    assert_eq!(store.version(), 1);
    assert_eq!(store.journal().stats().entries_appended, journal_before);
    assert_eq!(store.counters().committed, 3);
    Ok(())
}

#[test]
fn read_transactions_reject_writes_and_finished_ones_reject_everything() -> Result<()> {
    let store = Store::in_memory()?;
    let mut reader = store.begin(TxnMode::Read)?;
    assert!(matches!(
        reader.add_triple(&triple("a", "b", "c")),
        Err(TdbError::Txn(TxnError::ReadOnly))
    ));
    reader.commit()?;
    assert!(matches!(
        reader.triple_count(),
        Err(TdbError::Txn(TxnError::BadState { op: "read", state: "committed" }))
    ));

    let mut writer = store.begin(TxnMode::Write)?;
    writer.abort()?;
    assert!(matches!(
        writer.commit(),
        Err(TdbError::Txn(TxnError::BadState { state: "aborted", .. }))
    ));
    Ok(())
}

#[test]
fn one_writer_at_a_time() -> Result<()> {
    let store = Store::in_memory()?;
    let mut first = store.begin_labelled(TxnMode::Write, "first")?;
    assert_eq!(first.label(), Some("first"));
    assert!(matches!(
        store.try_begin(TxnMode::Write),
        Err(TdbError::Txn(TxnError::WriterActive))
    ));
    let reader = store.try_begin(TxnMode::Read)?;
    reader.end()?;

    let (tx, rx) = mpsc::channel();
    let shared = &store;
    thread::scope(|scope| -> Result<()> {
        let waiter = scope.spawn(move || -> Result<u64> {
            let mut second = shared.begin(TxnMode::Write)?;
            tx.send(()).ok();
            let start = second.start_version();
            second.add_triple(&triple("second", "p", "o"))?;
            second.commit()?;
            Ok(start)
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        first.add_triple(&triple("first", "p", "o"))?;
        first.commit()?;
        rx.recv_timeout(Duration::from_secs(10)).expect("second writer started");
        assert_eq!(waiter.join().expect("writer thread")?, 1);
        Ok(())
    })?;
    assert_eq!(store.version(), 2);
    Ok(())
}

#[test]
fn dropped_writer_is_rolled_back() -> Result<()> {
    let store = Store::in_memory()?;
    {
        let mut txn = store.begin(TxnMode::Write)?;
        txn.add_triple(&triple("x", "y", "z"))?;
    }
    assert_eq!(store.version(), 0);
    assert_eq!(store.counters().active_writers, 0);
    let mut again = store.try_begin(TxnMode::Write)?;
    assert_eq!(again.triple_count()?, 0);
    again.abort()?;
    Ok(())
}

#[test]
fn commits_survive_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let store = Store::open_dir(dir.path())?;
        store.write(|txn| {
            txn.add_triple(&triple("s", "p", "one"))?;
            txn.set_prefix(None, "ex", "http://example/")
        })?;
        store.write(|txn| txn.add_triple(&triple("s", "p", "two")))?;
        store.close()?;
    }
    let store = Store::open_dir(dir.path())?;
    assert_eq!(store.version(), 2);
    assert_eq!(store.recovery().replayed, 0);
    store.read(|txn| {
        assert_eq!(txn.triple_count()?, 2);
        assert_eq!(txn.prefix(None, "ex")?.as_deref(), Some("http://example/"));
        Ok(())
    })
}

#[test]
fn prepared_commit_is_recovered_from_the_journal() -> Result<()> {
    let dir = TempDir::new()?;
    let crashed = TempDir::new()?;
    let t = triple("durable", "p", "after-crash");
    {
        let store = Store::open_dir(dir.path())?;
        let mut txn = store.begin(TxnMode::Write)?;
        txn.add_triple(&t)?;
        txn.commit_prepare()?;
        assert_eq!(txn.state(), TxnState::Prepared);
        copy_store(dir.path(), crashed.path())?;
        txn.abort()?;
        assert_eq!(store.version(), 0);
    }

    let params = StoreParams::small();
    let store = Store::open(Location::dir(crashed.path())?, params.clone())?;
    assert_eq!(store.recovery().replayed, 1);
    assert_eq!(store.version(), 1);
    store.read(|txn| {
        assert!(txn.contains_triple(&t)?);
        Ok(())
    })?;
    drop(store);

    let original = Store::open(Location::dir(dir.path())?, params)?;
    assert_eq!(original.version(), 0);
    assert_eq!(original.recovery().replayed, 0);
    assert_eq!(original.recovery().discarded, 1);
    original.read(|txn| {
        assert!(!txn.contains_triple(&t)?);
        Ok(())
    })
}

#[test]
fn readers_on_disk_see_a_commit_only_once_enacted() -> Result<()> {
    let dir = TempDir::new()?;
    let store = Store::open_dir(dir.path())?;
    let q1 = Quad::new(
        Term::iri("http://example/g"),
        Term::iri("http://example/s"),
        Term::iri("http://example/p"),
        Term::literal("q1"),
    );

    let mut writer = store.begin(TxnMode::Write)?;
    assert!(writer.add(&q1)?);
    writer.commit_prepare()?;

    let early = store.begin(TxnMode::Read)?;
    assert!(!early.contains(&q1)?);
    writer.commit_enact()?;

    let late = store.begin(TxnMode::Read)?;
    assert_eq!(late.start_version(), 1);
    assert!(late.contains(&q1)?);
    assert!(!early.contains(&q1)?);

    writer.commit_clearup()?;
    assert_eq!(writer.state(), TxnState::Committed);
    assert!(!early.contains(&q1)?);
    assert_eq!(early.quad_count()?, 0);
    assert!(early.node_id(&Term::literal("q1"))?.is_absent());
    early.end()?;
    late.end()?;
    store.close()
}

#[test]
fn prepared_then_aborted_writer_leaves_nothing_on_disk() -> Result<()> {
    let dir = TempDir::new()?;
    let gone = triple("gone", "p", "never-enacted");
    let nodes_before;
    {
        let store = Store::open_dir(dir.path())?;
        store.write(|txn| txn.add_triple(&triple("kept", "p", "1")))?;
        nodes_before = store.node_count();

        let mut txn = store.begin(TxnMode::Write)?;
        txn.add_triple(&gone)?;
        txn.commit_prepare()?;
        txn.abort()?;
        assert_eq!(store.node_count(), nodes_before);
        assert_eq!(store.version(), 1);
    }

    let store = Store::open_dir(dir.path())?;
    assert_eq!(store.recovery().replayed, 1);
    assert_eq!(store.recovery().discarded, 1);
    assert_eq!(store.node_count(), nodes_before);
    assert_eq!(store.version(), 1);
    store.read(|txn| {
        assert!(!txn.contains_triple(&gone)?);
        assert!(txn.node_id(&Term::iri("http://example/gone"))?.is_absent());
        Ok(())
    })
}

#[test]
fn failed_prepare_only_allows_abort() -> Result<()> {
    let location = Location::mem();
    let store = Store::open(location.clone(), StoreParams::small())?;
    store.write(|txn| txn.add_triple(&triple("kept", "p", "1")))?;
    let journal_file = location.mem_file(JOURNAL_FILE).expect("journal file exists");

    let mut txn = store.begin(TxnMode::Write)?;
    txn.add_triple(&triple("lost", "p", "2"))?;
    journal_file.set_read_only(true);
    assert!(matches!(txn.commit(), Err(TdbError::Io(_))));
    assert_eq!(txn.state(), TxnState::Failed);
    assert!(matches!(
        txn.add_triple(&triple("later", "p", "3")),
        Err(TdbError::Txn(TxnError::BadState { op: "write", state: "failed" }))
    ));
    assert!(matches!(
        txn.commit_prepare(),
        Err(TdbError::Txn(TxnError::BadState { op: "prepare", state: "failed" }))
    ));
    journal_file.set_read_only(false);
    txn.abort()?;
    assert_eq!(store.version(), 1);
    assert_eq!(store.counters().aborted, 1);

    store.write(|txn| txn.add_triple(&triple("after", "p", "3")))?;
    drop(store);

    let store = Store::open(location, StoreParams::small())?;
    assert_eq!(store.recovery().replayed, 2);
    assert_eq!(store.version(), 2);
    store.read(|txn| {
        assert_eq!(txn.triple_count()?, 2);
        assert!(txn.contains_triple(&triple("kept", "p", "1"))?);
        assert!(txn.contains_triple(&triple("after", "p", "3"))?);
        assert!(!txn.contains_triple(&triple("lost", "p", "2"))?);
        assert!(txn.node_id(&Term::iri("http://example/later"))?.is_absent());
        Ok(())
    })
}

#[test]
fn read_promote_needs_an_unchanged_store() -> Result<()> {
    let store = Store::in_memory()?;
    let mut quiet = store.begin(TxnMode::ReadPromote)?;
    assert!(quiet.promote()?);
    assert_eq!(quiet.mode(), TxnMode::Write);
    assert!(quiet.add_triple(&triple("a", "p", "1"))?);
    quiet.commit()?;

    let mut stale = store.begin(TxnMode::ReadPromote)?;
    store.write(|txn| txn.add_triple(&triple("b", "p", "2")))?;
    assert!(!stale.promote()?);
    assert_eq!(stale.mode(), TxnMode::ReadPromote);
    assert!(matches!(
        stale.add_triple(&triple("c", "p", "3")),
        Err(TdbError::Txn(TxnError::ReadOnly))
    ));
    assert_eq!(stale.triple_count()?, 1);
    // the failed promotion gave the permit back
    store.try_begin(TxnMode::Write)?.abort()?;
    stale.end()?;

    let counters = store.counters();
    assert_eq!(counters.promoted, 1);
    assert_eq!(counters.active_readers, 0);
    assert_eq!(counters.active_writers, 0);
    Ok(())
}

#[test]
fn read_committed_promote_moves_to_the_latest_view() -> Result<()> {
    let store = Store::in_memory()?;
    let mut txn = store.begin(TxnMode::ReadCommittedPromote)?;
    let other = triple("other", "p", "1");
    store.write(|w| w.add_triple(&other))?;
    assert!(!txn.contains_triple(&other)?);

    assert!(txn.promote()?);
    assert_eq!(txn.start_version(), 1);
    assert!(txn.contains_triple(&other)?);
    txn.add_triple(&triple("mine", "p", "2"))?;
    assert!(matches!(
        store.try_begin(TxnMode::Write),
        Err(TdbError::Txn(TxnError::WriterActive))
    ));
    txn.commit()?;
    assert_eq!(store.version(), 2);
    store.read(|r| {
        assert_eq!(r.triple_count()?, 2);
        Ok(())
    })
}

#[test]
fn promotion_rules() -> Result<()> {
    let store = Store::in_memory()?;
    let mut plain = store.begin(TxnMode::Read)?;
    assert!(matches!(
        plain.promote(),
        Err(TdbError::Txn(TxnError::NotPromotable { mode: "read" }))
    ));
    plain.end()?;

    let mut writer = store.begin(TxnMode::Write)?;
    assert!(writer.promote()?);

    let mut waiting = store.begin(TxnMode::ReadCommittedPromote)?;
    assert!(matches!(
        waiting.try_promote(),
        Err(TdbError::Txn(TxnError::WriterActive))
    ));
    writer.abort()?;
    assert!(waiting.try_promote()?);
    waiting.abort()?;

    let mut done = store.begin(TxnMode::ReadPromote)?;
    done.commit()?;
    assert!(matches!(
        done.promote(),
        Err(TdbError::Txn(TxnError::BadState { op: "promote", state: "committed" }))
    ));
    Ok(())
}

#[test]
fn blocked_writers_wait_while_readers_continue() -> Result<()> {
    let store = Store::in_memory()?;
    let blocked = store.block_writers();
    assert!(store.try_block_writers().is_none());
    assert!(matches!(
        store.try_begin(TxnMode::Write),
        Err(TdbError::Txn(TxnError::WriterActive))
    ));
    store.read(|txn| {
        assert_eq!(txn.triple_count()?, 0);
        Ok(())
    })?;

    let (tx, rx) = mpsc::channel();
    let shared = &store;
    thread::scope(|scope| -> Result<()> {
        let writer = scope.spawn(move || -> Result<()> {
            shared.write(|txn| txn.add_triple(&triple("w", "p", "o")))?;
            tx.send(()).ok();
            Ok(())
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        blocked.enable_writers();
        rx.recv_timeout(Duration::from_secs(10)).expect("writer finished");
        writer.join().expect("writer thread")
    })?;
    assert_eq!(store.version(), 1);
    Ok(())
}

#[test]
fn exclusive_mode_waits_for_transactions_and_holds_off_new_ones() -> Result<()> {
    let store = Store::in_memory()?;
    let reader = store.begin(TxnMode::Read)?;
    assert!(store.try_exclusive().is_none());

    let (tx, rx) = mpsc::channel();
    let shared = &store;
    thread::scope(|scope| -> Result<()> {
        let holder = scope.spawn(move || -> Result<()> {
            let exclusive = shared.exclusive();
            tx.send(()).ok();
            assert!(matches!(
                shared.try_begin(TxnMode::Read),
                Err(TdbError::Txn(TxnError::Exclusive))
            ));
            shared.checkpoint()?;
            exclusive.finish();
            Ok(())
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        reader.end()?;
        rx.recv_timeout(Duration::from_secs(10)).expect("exclusive mode entered");
        holder.join().expect("exclusive thread")
    })?;

    let exclusive = store.try_exclusive().expect("nothing running");
    drop(exclusive);
    store.write(|txn| txn.add_triple(&triple("x", "y", "z")))?;
    assert_eq!(store.version(), 1);
    Ok(())
}
