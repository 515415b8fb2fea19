#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tdbx::admin::journal_entries;
use tdbx::model::{vocab, Quad, Term, Triple};
use tdbx::primitives::io::Location;
use tdbx::store::JOURNAL_FILE;
use tdbx::{Result, Store, StoreParams, TxnMode};
use tempfile::TempDir;

fn lazy_params() -> StoreParams {
    StoreParams {
        journal_threshold_bytes: u64::MAX,
        checkpoint_batch_commits: 0,
        ..StoreParams::small()
    }
}

fn open(path: &Path) -> Result<Store> {
    Store::open(Location::dir(path)?, lazy_params())
}

fn person(i: usize) -> Triple {
    Triple::new(
        Term::iri(format!("http://example/person/{i}")),
        Term::iri("http://example/age"),
        Term::typed_literal((20 + i).to_string(), vocab::XSD_INTEGER),
    )
}

#[test]
fn uncheckpointed_commits_replay_on_open() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let store = open(dir.path())?;
        for i in 0..5 {
            store.write(|txn| txn.add_triple(&person(i)))?;
        }
        store.write(|txn| {
            txn.add(&Quad::new(
                Term::iri("http://example/g"),
                Term::iri("http://example/person/0"),
                Term::iri("http://example/name"),
                Term::lang_literal("Zero", "en"),
            ))
        })?;
        store.write(|txn| txn.delete_triple(&person(4)))?;
        assert_eq!(store.version(), 7);
        assert!(store.journal().len() > 0);
        // dropped without close: nothing is checkpointed
    }

    let listing = journal_entries(dir.path()).expect("journal listing");
    let commits = listing.entries.iter().filter(|e| e.kind == "commit").count();
    assert_eq!(commits, 7);
    assert!(listing.entries.iter().any(|e| e.kind == "object" && e.file_ref == "nodes.dat"));
    assert!(listing.entries.iter().any(|e| e.kind == "block" && e.file_ref == "quads"));
    assert!(listing
        .entries
        .iter()
        .filter(|e| e.kind == "buffer")
        .all(|e| e.file_ref == "state" && e.payload_len == 16));

    let store = open(dir.path())?;
    assert_eq!(store.recovery().replayed, 7);
    assert_eq!(store.version(), 7);
    assert!(store.journal().len() < listing.bytes, "recovery checkpoints");
    store.read(|txn| {
        assert_eq!(txn.triple_count()?, 4);
        assert_eq!(txn.quad_count()?, 1);
        assert!(txn.contains_triple(&person(3))?);
        assert!(!txn.contains_triple(&person(4))?);
        let ages: Vec<Triple> = txn
            .find_triples(None, Some(&Term::iri("http://example/age")), None)?
            .collect::<Result<_>>()?;
        assert_eq!(ages.len(), 4);
        Ok(())
    })?;
    store.close()?;

    let store = open(dir.path())?;
    assert_eq!(store.recovery().replayed, 0);
    assert_eq!(store.version(), 7);
    Ok(())
}

#[test]
fn torn_journal_tail_is_ignored() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let store = open(dir.path())?;
        store.write(|txn| txn.add_triple(&person(1)))?;
        store.write(|txn| txn.add_triple(&person(2)))?;
    }
    let mut file = OpenOptions::new().append(true).open(dir.path().join(JOURNAL_FILE))?;
    file.write_all(&[0x05, 0x00, 0x00, 0x01, 0xff, 0xee])?;
    drop(file);

    let store = open(dir.path())?;
    assert_eq!(store.recovery().replayed, 2);
    assert_eq!(store.version(), 2);
    store.read(|txn| {
        assert_eq!(txn.triple_count()?, 2);
        Ok(())
    })
}

#[test]
fn writer_in_flight_at_crash_leaves_no_trace() -> Result<()> {
    let dir = TempDir::new()?;
    let crashed = TempDir::new()?;
    {
        let store = open(dir.path())?;
        store.write(|txn| txn.add_triple(&person(1)))?;
        let mut txn = store.begin(TxnMode::Write)?;
        txn.add_triple(&person(2))?;
        for entry in std::fs::read_dir(dir.path())? {
            let entry = entry?;
            std::fs::copy(entry.path(), crashed.path().join(entry.file_name()))?;
        }
        txn.abort()?;
    }
    let store = open(crashed.path())?;
    assert_eq!(store.version(), 1);
    assert_eq!(store.recovery().discarded, 0);
    store.read(|txn| {
        assert!(txn.contains_triple(&person(1))?);
        assert!(!txn.contains_triple(&person(2))?);
        assert!(txn.node_id(&Term::iri("http://example/person/2"))?.is_absent());
        Ok(())
    })
}

#[test]
fn default_params_batch_commits_between_checkpoints() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let store = Store::open_dir(dir.path())?;
        for i in 0..3 {
            store.write(|txn| txn.add_triple(&person(i)))?;
        }
        assert_eq!(store.uncheckpointed_commits(), 3);
        assert_eq!(store.journal().stats().truncations, 0);
        // dropped without close
    }

    let listing = journal_entries(dir.path()).expect("journal listing");
    assert_eq!(listing.entries.iter().filter(|e| e.kind == "begin").count(), 3);
    assert_eq!(listing.entries.iter().filter(|e| e.kind == "commit").count(), 3);

    let store = Store::open_dir(dir.path())?;
    assert_eq!(store.recovery().replayed, 3);
    assert_eq!(store.version(), 3);
    assert_eq!(store.uncheckpointed_commits(), 0);
    store.read(|txn| {
        assert_eq!(txn.triple_count()?, 3);
        Ok(())
    })
}

#[test]
fn commit_batch_triggers_a_checkpoint() -> Result<()> {
    let dir = TempDir::new()?;
    let params = StoreParams {
        checkpoint_batch_commits: 3,
        ..StoreParams::small()
    };
    let store = Store::open(Location::dir(dir.path())?, params)?;
    store.write(|txn| txn.add_triple(&person(1)))?;
    store.write(|txn| txn.add_triple(&person(2)))?;
    assert_eq!(store.uncheckpointed_commits(), 2);
    store.write(|txn| txn.add_triple(&person(3)))?;
    assert_eq!(store.uncheckpointed_commits(), 0);
    assert_eq!(store.journal().stats().truncations, 1);
    let kinds: Vec<_> = store
        .journal()
        .entries()?
        .map(|item| item.map(|(_, entry)| entry.kind.as_str()))
        .collect::<Result<_>>()?;
    assert_eq!(kinds, vec!["checkpoint"]);
    Ok(())
}
