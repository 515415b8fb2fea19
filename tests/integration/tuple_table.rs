#![allow(missing_docs)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use tdbx::model::Term;
use tdbx::primitives::io::Location;
use tdbx::storage::nodes::NodeTableNative;
use tdbx::storage::{NodeTupleTable, Tuple, TupleTable};
use tdbx::types::{NodeId, Result};
use tempfile::TempDir;

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn quad_labels() -> Vec<String> {
    labels(&["GSPO", "GPOS", "GOSP", "SPOG", "POSG", "OSPG"])
}

fn tuple(raw: &[u64]) -> Tuple {
    raw.iter().map(|&v| NodeId(v)).collect()
}

fn brute_force(rows: &BTreeSet<Vec<u64>>, pattern: &[Option<u64>]) -> BTreeSet<Vec<u64>> {
    rows.iter()
        .filter(|row| {
            row.iter()
                .zip(pattern)
                .all(|(have, want)| want.map_or(true, |w| w == *have))
        })
        .cloned()
        .collect()
}

#[test]
fn quad_table_snapshot_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let location = Location::dir(dir.path())?;
    {
        let (mut table, version) = TupleTable::open("quads", &quad_labels(), &location)?;
        assert_eq!(version, 0);
        for g in 1..=3u64 {
            for s in 10..15u64 {
                table.add(&tuple(&[g, s, 100, 1000 + s]))?;
            }
        }
        table.close(4)?;
    }
    for label in ["GSPO", "GPOS", "OSPG"] {
        assert!(dir.path().join(format!("{label}.idx")).exists(), "{label}");
    }

    let (table, version) = TupleTable::open("quads", &quad_labels(), &location)?;
    assert_eq!(version, 4);
    assert_eq!(table.len(), 15);
    assert!(table.indexes().iter().all(|index| index.len() == 15));
    let in_g2: Vec<Tuple> = table.find(&[Some(NodeId(2)), None, None, None])?.collect();
    assert_eq!(in_g2.len(), 5);
    assert!(in_g2.iter().all(|t| t[0] == NodeId(2)));
    let by_object: Vec<Tuple> = table.find(&[None, None, None, Some(NodeId(1012))])?.collect();
    assert_eq!(by_object.len(), 3);
    Ok(())
}

#[test]
fn term_table_maps_through_the_node_table() -> Result<()> {
    let mut table = NodeTupleTable::new(
        NodeTableNative::in_memory(),
        TupleTable::from_labels("triples", &labels(&["SPO", "POS", "OSP"]))?,
    );
    let alice = Term::iri("http://example/alice");
    let knows = Term::iri("http://example/knows");
    let bob = Term::iri("http://example/bob");
    let name = Term::iri("http://example/name");

    assert!(table.add(&[alice.clone(), knows.clone(), bob.clone()])?);
    assert!(table.add(&[bob.clone(), name.clone(), Term::literal("Bob")])?);
    assert!(!table.add(&[alice.clone(), knows.clone(), bob.clone()])?);
    assert_eq!(table.len(), 2);

    let about_bob: Vec<Vec<Term>> = table
        .find(&[None, None, Some(&bob)])?
        .collect::<Result<_>>()?;
    assert_eq!(about_bob, vec![vec![alice.clone(), knows.clone(), bob.clone()]]);

    let stranger = Term::iri("http://example/nobody");
    assert_eq!(table.find(&[Some(&stranger), None, None])?.count(), 0);
    assert!(table.delete(&[alice, knows, bob])?);
    assert_eq!(table.len(), 1);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_pattern_matches_a_full_scan(
        rows in proptest::collection::btree_set(proptest::collection::vec(1u64..5, 3), 0..40),
        pattern in proptest::collection::vec(proptest::option::of(1u64..5), 3),
    ) {
        let mut table = TupleTable::from_labels("triples", &labels(&["SPO", "POS", "OSP"])).unwrap();
        for row in &rows {
            prop_assert!(table.add(&tuple(row)).unwrap());
        }
        let wanted: Vec<Option<NodeId>> = pattern.iter().map(|slot| slot.map(NodeId)).collect();
        let found: BTreeSet<Vec<u64>> = table
            .find(&wanted)
            .unwrap()
            .map(|t| t.iter().map(|id| id.0).collect())
            .collect();
        prop_assert_eq!(found, brute_force(&rows, &pattern));

        for index in table.indexes() {
            let scanned: BTreeSet<Vec<u64>> = index.all().map(|t| t.iter().map(|id| id.0).collect()).collect();
            prop_assert_eq!(&scanned, &rows);
        }
    }
}
