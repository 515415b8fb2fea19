#![allow(missing_docs)]

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tdbx::model::{vocab, Quad, Term, Triple};
use tdbx::primitives::io::Location;
use tdbx::{Store, StoreParams};
use tempfile::TempDir;

fn seed(store: &Store) -> tdbx::Result<()> {
    store.write(|txn| {
        txn.set_prefix(None, "ex", "http://example/")?;
        for i in 0..10 {
            txn.add_triple(&Triple::new(
                Term::iri(format!("http://example/item/{i}")),
                Term::iri("http://example/rank"),
                Term::typed_literal(i.to_string(), vocab::XSD_INTEGER),
            ))?;
        }
        txn.add(&Quad::new(
            Term::iri("http://example/g"),
            Term::iri("http://example/item/0"),
            Term::iri("http://example/label"),
            Term::lang_literal("zero", "en"),
        ))?;
        Ok(())
    })
}

fn setup_store() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("store");
    let store = Store::open_dir(&path).expect("open store");
    seed(&store).expect("seed store");
    store.close().expect("close store");
    (dir, path)
}

fn json_of(args: &[&str], path: &PathBuf) -> Value {
    let output = cargo_bin_cmd!("tdbx")
        .args(["--format", "json"])
        .args(args)
        .arg(path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn stats_emits_json() {
    let (_dir, path) = setup_store();
    let json = json_of(&["stats"], &path);
    assert_eq!(json["store"]["version"], 1);
    assert_eq!(json["store"]["triples"], 10);
    assert_eq!(json["store"]["quads"], 1);
    assert_eq!(json["store"]["prefixes"], 1);
    assert!(json["store"]["node_entries"].as_u64().unwrap() > 0);
    let tables = json["tables"].as_array().expect("tables");
    assert_eq!(tables.len(), 3);
    let triples = &tables[0];
    assert_eq!(triples["name"], "triples");
    assert!(triples["indexes"]
        .as_array()
        .unwrap()
        .iter()
        .all(|index| index["entries"] == 10));
    assert!(json["node_cache"]["hit_rate"].is_number());
    let files = json["filesystem"].as_array().expect("files");
    assert!(files.iter().any(|f| f["name"] == "nodes.dat"));
}

#[test]
fn stats_text_lists_indexes() {
    let (_dir, path) = setup_store();
    let output = cargo_bin_cmd!("tdbx")
        .arg("stats")
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8 output");
    assert!(text.contains("triples rows=10"), "{text}");
    assert!(text.contains("SPO=10"), "{text}");
}

#[test]
fn verify_full_succeeds() {
    let (_dir, path) = setup_store();
    let json = json_of(&["verify", "--level", "full"], &path);
    assert_eq!(json["success"], true);
    assert_eq!(json["level"], "full");
    assert_eq!(json["counts"]["tuples_checked"], 12);
    assert!(json["counts"]["nodes_checked"].as_u64().unwrap() > 0);
}

#[test]
fn checkpoint_completes() {
    let (_dir, path) = setup_store();
    let json = json_of(&["checkpoint"], &path);
    assert_eq!(json["version"], 1);
    assert_eq!(json["replayed"], 0);
}

#[test]
fn journal_lists_uncheckpointed_commits() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("store");
    {
        let params = StoreParams {
            journal_threshold_bytes: u64::MAX,
            checkpoint_batch_commits: 0,
            ..StoreParams::small()
        };
        let store = Store::open(Location::dir(&path).expect("location"), params).expect("open store");
        seed(&store).expect("seed store");
    }
    let json = json_of(&["journal"], &path);
    let entries = json["entries"].as_array().expect("entries");
    assert_eq!(entries.first().unwrap()["kind"], "begin");
    assert_eq!(entries.last().unwrap()["kind"], "commit");
    assert!(entries.iter().any(|e| e["kind"] == "block" && e["file_ref"] == "prefixes"));
    let state = entries.iter().find(|e| e["kind"] == "buffer").expect("state buffer");
    let head = state["payload_head"].as_str().expect("hex preview");
    assert_eq!(head.len(), 32);
    assert!(head.starts_with("0000000000000001"), "version 1 leads the state buffer: {head}");
    assert!(entries.iter().filter(|e| e["kind"] == "commit").all(|e| e["payload_head"] == ""));

    let text = cargo_bin_cmd!("tdbx")
        .arg("journal")
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(text).expect("utf8");
    assert!(text.contains(&format!("head={head}")));

    let json = json_of(&["checkpoint"], &path);
    assert_eq!(json["replayed"], 1);
    let json = json_of(&["journal"], &path);
    assert!(json["entries"]
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["kind"] == "checkpoint"));
}

#[test]
fn dump_and_load_round_trip() {
    let (dir, path) = setup_store();
    let stream = dir.path().join("dump.rdfpb");
    let copy = dir.path().join("copy");

    cargo_bin_cmd!("tdbx")
        .arg("dump")
        .arg(&path)
        .arg(&stream)
        .assert()
        .success();
    assert!(stream.exists());

    cargo_bin_cmd!("tdbx")
        .arg("load")
        .arg(&copy)
        .arg(&stream)
        .assert()
        .failure();

    let output = cargo_bin_cmd!("tdbx")
        .args(["--format", "json", "load", "--create"])
        .arg(&copy)
        .arg(&stream)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(report["triples_added"], 10);
    assert_eq!(report["quads_added"], 1);

    let store = Store::open_dir(&copy).expect("open copy");
    let count = store.read(|txn| txn.triple_count()).expect("count");
    assert_eq!(count, 10);
    let label = store
        .read(|txn| txn.prefix(None, "ex"))
        .expect("prefix lookup");
    assert_eq!(label.as_deref(), Some("http://example/"));
}

#[test]
fn missing_store_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let output = cargo_bin_cmd!("tdbx")
        .arg("stats")
        .arg(dir.path().join("nothing-here"))
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("store not found"));
}
