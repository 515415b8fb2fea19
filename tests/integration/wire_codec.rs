#![allow(missing_docs)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use tdbx::admin::{dump_from, load_into};
use tdbx::codec::{
    from_wire, read_stream_message, to_wire, write_stream_message, PrefixMap, ProtobufStreamReader,
    ProtobufStreamWriter, ResultRowReader, ResultRowWriter, StreamCollector, StreamRdf,
};
use tdbx::model::{vocab, Quad, Term, Triple};
use tdbx::{Result, Store};

fn ex(local: &str) -> Term {
    Term::iri(format!("http://example/{local}"))
}

fn seed(store: &Store) -> Result<()> {
    store.write(|txn| {
        txn.set_prefix(None, "ex", "http://example/")?;
        txn.add_triple(&Triple::new(ex("alice"), ex("age"), Term::typed_literal("42", vocab::XSD_INTEGER)))?;
        txn.add_triple(&Triple::new(ex("alice"), ex("name"), Term::lang_literal("Alice", "en")))?;
        txn.add_triple(&Triple::new(ex("alice"), ex("height"), Term::typed_literal("1.70", vocab::XSD_DECIMAL)))?;
        txn.add_triple(&Triple::new(Term::blank("b1"), ex("knows"), ex("alice")))?;
        txn.add(&Quad::new(ex("g1"), ex("bob"), ex("likes"), Term::literal("tea")))?;
        txn.add(&Quad::new(
            ex("g2"),
            ex("bob"),
            ex("said"),
            Term::triple(Triple::new(ex("alice"), ex("likes"), Term::literal("coffee"))),
        ))?;
        Ok(())
    })
}

fn contents(store: &Store) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
    store.read(|txn| {
        let triples = txn
            .find_triples(None, None, None)?
            .map(|t| t.map(|t| format!("{t:?}")))
            .collect::<Result<_>>()?;
        let quads = txn
            .find_quads(None, None, None, None)?
            .map(|q| q.map(|q| format!("{q:?}")))
            .collect::<Result<_>>()?;
        Ok((triples, quads))
    })
}

#[test]
fn dump_then_load_reproduces_the_dataset() -> Result<()> {
    let source = Store::in_memory()?;
    seed(&source)?;
    let mut bytes = Vec::new();
    let dumped = dump_from(&source, &mut bytes)?;
    assert_eq!((dumped.prefixes, dumped.triples, dumped.quads), (1, 4, 2));

    let target = Store::in_memory()?;
    let loaded = load_into(&target, bytes.as_slice())?;
    assert_eq!(loaded.rows, 7);
    assert_eq!(loaded.triples_added, 4);
    assert_eq!(loaded.quads_added, 2);
    assert_eq!(target.version(), 1);
    assert_eq!(contents(&target)?, contents(&source)?);
    assert_eq!(
        target.read(|txn| txn.prefix(None, "ex"))?.as_deref(),
        Some("http://example/")
    );

    let again = load_into(&target, bytes.as_slice())?;
    assert_eq!(again.triples_added, 0);
    assert_eq!(target.version(), 1, "loading the same data twice adds nothing");
    Ok(())
}

#[test]
fn a_bad_row_loads_nothing() -> Result<()> {
    let mut writer = ProtobufStreamWriter::new(Vec::new());
    writer.triple(&Triple::new(ex("s"), ex("p"), ex("o")))?;
    let mut bytes = writer.into_inner();
    bytes.extend_from_slice(&[0x03, 0x0a, 0x01]);

    let store = Store::in_memory()?;
    assert!(load_into(&store, bytes.as_slice()).is_err());
    assert_eq!(store.version(), 0);
    assert_eq!(store.read(|txn| txn.triple_count())?, 0);
    Ok(())
}

#[test]
fn prefixes_shrink_the_stream() -> Result<()> {
    let triples: Vec<Triple> = (0..20)
        .map(|i| Triple::new(ex(&format!("s{i}")), ex("p"), ex(&format!("o{i}"))))
        .collect();

    let mut plain = ProtobufStreamWriter::new(Vec::new());
    let mut short = ProtobufStreamWriter::new(Vec::new());
    short.prefix("ex", "http://example/")?;
    for t in &triples {
        plain.triple(t)?;
        short.triple(t)?;
    }
    let (plain, short) = (plain.into_inner(), short.into_inner());
    assert!(short.len() < plain.len());

    let mut collected = StreamCollector::default();
    ProtobufStreamReader::new(short.as_slice()).parse(&mut collected)?;
    assert_eq!(collected.triples, triples);
    Ok(())
}

#[test]
fn whole_message_and_rows_carry_store_results() -> Result<()> {
    let store = Store::in_memory()?;
    seed(&store)?;
    let alice_rows: Vec<Vec<Option<Term>>> = store.read(|txn| {
        txn.find_triples(Some(&ex("alice")), None, None)?
            .map(|t| t.map(|t| vec![Some(t.predicate), Some(t.object)]))
            .collect()
    })?;

    let mut prefixes = PrefixMap::new();
    prefixes.add("ex", "http://example/");
    let mut writer = ResultRowWriter::new(Vec::new(), &["p", "o"])?.with_prefixes(prefixes.clone());
    for row in &alice_rows {
        writer.write_row(row)?;
    }
    writer.write_row(&[Some(ex("unbound")), None])?;
    let bytes = writer.finish()?;

    let reader = ResultRowReader::with_prefixes(bytes.as_slice(), prefixes)?;
    let rows = reader.collect::<Result<Vec<_>>>()?;
    assert_eq!(rows.len(), alice_rows.len() + 1);
    assert_eq!(&rows[..alice_rows.len()], alice_rows.as_slice());
    assert_eq!(rows.last().unwrap()[1], None);

    let mut collected = StreamCollector::default();
    collected.prefix("ex", "http://example/")?;
    collected.triples = store.read(|txn| txn.find_triples(None, None, None)?.collect())?;
    let mut message = Vec::new();
    write_stream_message(&mut message, &collected, true)?;
    let mut back = StreamCollector::default();
    assert_eq!(read_stream_message(&mut message.as_slice(), &mut back)?, 5);
    assert_eq!(back.triples, collected.triples);
    Ok(())
}

proptest! {
    #[test]
    fn lexical_forms_survive_without_values(lexical in "\\PC{0,24}", tag in "[a-z]{2,3}") {
        for term in [
            Term::literal(lexical.as_str()),
            Term::lang_literal(lexical.as_str(), tag.as_str()),
            Term::typed_literal(lexical.as_str(), vocab::XSD_INTEGER),
            Term::typed_literal(lexical.as_str(), vocab::XSD_DOUBLE),
        ] {
            let wire = to_wire(&term, None, false).unwrap();
            prop_assert_eq!(from_wire(&wire, None).unwrap(), term);
        }
    }

    #[test]
    fn integers_come_back_canonical(v in any::<i64>()) {
        let term = Term::typed_literal(format!("{v:+}"), vocab::XSD_LONG);
        let wire = to_wire(&term, None, true).unwrap();
        prop_assert_eq!(
            from_wire(&wire, None).unwrap(),
            Term::typed_literal(v.to_string(), vocab::XSD_INTEGER)
        );
    }
}
