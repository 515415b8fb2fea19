#![allow(missing_docs)]

use std::sync::Arc;

use proptest::prelude::*;
use tdbx::model::{vocab, Term, Triple};
use tdbx::primitives::io::Location;
use tdbx::storage::nodes::{CacheSizes, NodeTable, NodeTableCache, NodeTableInline, NodeTableNative, SharedNodeTable};
use tdbx::storage::NodeTableView;
use tdbx::types::{NodeId, NodeIdRef, Result};
use tempfile::TempDir;

fn stack(location: &Location) -> Result<SharedNodeTable> {
    let native = NodeTableNative::open(location)?;
    let cache = NodeTableCache::new(
        native,
        CacheSizes {
            node_to_id: 8,
            id_to_node: 8,
            node_miss: 8,
        },
    );
    Ok(Arc::new(NodeTableInline::new(cache)))
}

fn sample_terms() -> Vec<Term> {
    vec![
        Term::iri("http://example/s"),
        Term::blank("b0"),
        Term::literal("plain"),
        Term::lang_literal("chat", "fr"),
        Term::typed_literal("2024-01-01", "http://www.w3.org/2001/XMLSchema#date"),
        Term::typed_literal("42", vocab::XSD_INTEGER),
        Term::typed_literal("007", vocab::XSD_INTEGER),
        Term::typed_literal("true", vocab::XSD_BOOLEAN),
        Term::triple(Triple::new(
            Term::iri("http://example/a"),
            Term::iri("http://example/b"),
            Term::literal("c"),
        )),
    ]
}

#[test]
fn ids_survive_close_and_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let location = Location::dir(dir.path())?;
    let terms = sample_terms();

    let ids: Vec<NodeId> = {
        let table = stack(&location)?;
        let ids = terms
            .iter()
            .map(|t| table.get_alloc_node_id(t))
            .collect::<Result<Vec<_>>>()?;
        table.close()?;
        ids
    };

    let table = stack(&location)?;
    for (term, id) in terms.iter().zip(&ids) {
        assert_eq!(table.get_node_id_for_node(term)?, NodeIdRef::Concrete(*id), "{term:?}");
        assert_eq!(table.get_node_for_node_id(*id)?.as_ref(), Some(term));
    }
    let stored = table.all()?.count();
    let inline = ids.iter().filter(|id| id.is_inline()).count();
    assert_eq!(inline, 2, "canonical integer and boolean inline");
    assert_eq!(stored, terms.len() - inline);
    Ok(())
}

#[test]
fn stored_terms_come_back_in_allocation_order() -> Result<()> {
    let dir = TempDir::new()?;
    let location = Location::dir(dir.path())?;
    let table = stack(&location)?;
    let mut allocated = Vec::new();
    for i in 0..50 {
        let term = Term::iri(format!("http://example/n{i}"));
        allocated.push((table.get_alloc_node_id(&term)?, term));
    }
    let listed = table.all()?.collect::<Result<Vec<_>>>()?;
    assert_eq!(listed, allocated);
    assert!(listed.windows(2).all(|w| w[0].0 < w[1].0));
    Ok(())
}

#[test]
fn view_limits_visibility_across_the_stack() -> Result<()> {
    let table = stack(&Location::mem())?;
    let before = table.get_alloc_node_id(&Term::iri("http://example/before"))?;
    let view = NodeTableView::new(Arc::clone(&table), table.limit());
    let after = table.get_alloc_node_id(&Term::iri("http://example/after"))?;

    assert_eq!(view.get_node_for_node_id(before)?, Some(Term::iri("http://example/before")));
    assert_eq!(view.get_node_for_node_id(after)?, None);
    assert!(view
        .get_node_id_for_node(&Term::iri("http://example/after"))?
        .is_absent());
    assert_eq!(view.get_node_id_for_node(&Term::Any)?, NodeIdRef::Any);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn allocation_is_a_stable_bijection(lexicals in proptest::collection::vec("[a-z0-9 ]{0,12}", 1..40)) {
        let table = stack(&Location::mem()).unwrap();
        let first: Vec<NodeId> = lexicals
            .iter()
            .map(|l| table.get_alloc_node_id(&Term::literal(l.as_str())).unwrap())
            .collect();
        for (lexical, id) in lexicals.iter().zip(&first) {
            prop_assert_eq!(table.get_alloc_node_id(&Term::literal(lexical.as_str())).unwrap(), *id);
            prop_assert_eq!(table.get_node_for_node_id(*id).unwrap(), Some(Term::literal(lexical.as_str())));
        }
        for (i, a) in lexicals.iter().enumerate() {
            for (j, b) in lexicals.iter().enumerate() {
                prop_assert_eq!(a == b, first[i] == first[j]);
            }
        }
    }
}
