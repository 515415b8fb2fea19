#![forbid(unsafe_code)]

use smallvec::SmallVec;
use tracing::trace;

use crate::model::Term;
use crate::storage::nodes::NodeTable;
use crate::storage::tuple::{Tuple, TupleScan, TupleTable};
use crate::types::{NodeId, NodeIdRef, Result, TdbError};

/// A tuple table addressed by terms instead of node ids.
///
/// Adds allocate ids in the node table; deletes and finds only look ids up,
/// and a bound term that was never stored short-circuits to "no match".
#[derive(Clone)]
pub struct NodeTupleTable<N> {
    nodes: N,
    tuples: TupleTable,
}

impl<N: NodeTable> NodeTupleTable<N> {
    pub fn new(nodes: N, tuples: TupleTable) -> Self {
        Self { nodes, tuples }
    }

    pub fn nodes(&self) -> &N {
        &self.nodes
    }

    pub fn tuples(&self) -> &TupleTable {
        &self.tuples
    }

    pub fn tuples_mut(&mut self) -> &mut TupleTable {
        &mut self.tuples
    }

    pub fn into_tuples(self) -> TupleTable {
        self.tuples
    }

    /// Adds a tuple of concrete terms. Returns true if it was new.
    pub fn add(&mut self, terms: &[Term]) -> Result<bool> {
        self.check_arity(terms.len())?;
        let ids = terms
            .iter()
            .map(|term| self.nodes.get_alloc_node_id(term))
            .collect::<Result<Tuple>>()?;
        self.tuples.add(&ids)
    }

    /// Deletes a tuple of concrete terms. Returns true if it was present.
    pub fn delete(&mut self, terms: &[Term]) -> Result<bool> {
        match self.lookup_all(terms)? {
            Some(ids) => self.tuples.delete(&ids),
            None => Ok(false),
        }
    }

    /// Returns true if the tuple of concrete terms is present.
    pub fn contains(&self, terms: &[Term]) -> Result<bool> {
        match self.lookup_all(terms)? {
            Some(ids) => self.tuples.contains(&ids),
            None => Ok(false),
        }
    }

    /// Tuples matching `pattern`; `None` and [`Term::Any`] match anything.
    pub fn find(&self, pattern: &[Option<&Term>]) -> Result<NodeTupleScan<'_, N>> {
        self.check_arity(pattern.len())?;
        let mut ids: SmallVec<[Option<NodeId>; 4]> = SmallVec::with_capacity(pattern.len());
        for slot in pattern {
            match slot {
                None => ids.push(None),
                Some(term) => match self.nodes.get_node_id_for_node(term)? {
                    NodeIdRef::Concrete(id) => ids.push(Some(id)),
                    NodeIdRef::Any => ids.push(None),
                    NodeIdRef::Absent => {
                        trace!(table = self.tuples.name(), "node_tuple.find.absent_term");
                        return Ok(NodeTupleScan {
                            nodes: &self.nodes,
                            scan: None,
                        });
                    }
                },
            }
        }
        Ok(NodeTupleScan {
            nodes: &self.nodes,
            scan: Some(self.tuples.find(&ids)?),
        })
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Returns true if the table holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    fn lookup_all(&self, terms: &[Term]) -> Result<Option<Tuple>> {
        self.check_arity(terms.len())?;
        let mut ids = Tuple::with_capacity(terms.len());
        for term in terms {
            match self.nodes.get_node_id_for_node(term)? {
                NodeIdRef::Concrete(id) => ids.push(id),
                NodeIdRef::Absent => return Ok(None),
                NodeIdRef::Any => return Err(TdbError::Invalid("wildcard in a concrete tuple")),
            }
        }
        Ok(Some(ids))
    }

    fn check_arity(&self, actual: usize) -> Result<()> {
        let expected = self.tuples.arity();
        if actual != expected {
            return Err(TdbError::Arity { expected, actual });
        }
        Ok(())
    }
}

/// Lazy term-level results of [`NodeTupleTable::find`].
pub struct NodeTupleScan<'a, N> {
    nodes: &'a N,
    scan: Option<TupleScan>,
}

impl<N: NodeTable> Iterator for NodeTupleScan<'_, N> {
    type Item = Result<Vec<Term>>;

    fn next(&mut self) -> Option<Self::Item> {
        let tuple = self.scan.as_mut()?.next()?;
        Some(
            tuple
                .iter()
                .map(|&id| {
                    self.nodes.get_node_for_node_id(id)?.ok_or_else(|| {
                        TdbError::InvalidOwned(format!("tuple references unknown node {id}"))
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::nodes::NodeTableNative;
    use std::sync::Arc;

    fn table() -> NodeTupleTable<Arc<NodeTableNative>> {
        let labels: Vec<String> = ["SPO", "POS", "OSP"].iter().map(|s| s.to_string()).collect();
        NodeTupleTable::new(
            Arc::new(NodeTableNative::in_memory()),
            TupleTable::from_labels("triples", &labels).unwrap(),
        )
    }

    fn iri(s: &str) -> Term {
        Term::iri(format!("http://example/{s}"))
    }

    #[test]
    fn add_find_delete_by_term() -> Result<()> {
        let mut t = table();
        assert!(t.add(&[iri("s"), iri("p"), Term::literal("o")])?);
        assert!(!t.add(&[iri("s"), iri("p"), Term::literal("o")])?);
        t.add(&[iri("s2"), iri("p"), iri("o2")])?;

        let p = iri("p");
        let rows: Vec<Vec<Term>> = t.find(&[None, Some(&p), None])?.collect::<Result<_>>()?;
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&vec![iri("s"), iri("p"), Term::literal("o")]));

        let any = Term::Any;
        assert_eq!(t.find(&[Some(&any), None, Some(&iri("o2"))])?.count(), 1);

        assert!(t.delete(&[iri("s"), iri("p"), Term::literal("o")])?);
        assert!(!t.contains(&[iri("s"), iri("p"), Term::literal("o")])?);
        assert_eq!(t.len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_terms_short_circuit_without_allocating() -> Result<()> {
        let mut t = table();
        t.add(&[iri("s"), iri("p"), iri("o")])?;
        let before = t.nodes().limit();
        let ghost = iri("never-stored");
        assert_eq!(t.find(&[Some(&ghost), None, None])?.count(), 0);
        assert!(!t.delete(&[ghost.clone(), iri("p"), iri("o")])?);
        assert!(!t.contains(&[ghost, iri("p"), iri("o")])?);
        assert_eq!(t.nodes().limit(), before);
        Ok(())
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let mut t = table();
        assert!(matches!(
            t.add(&[iri("s"), iri("p")]),
            Err(TdbError::Arity { expected: 3, actual: 2 })
        ));
        assert!(t.find(&[None, None]).is_err());
    }
}
