#![forbid(unsafe_code)]

use crate::model::{Quad, Term, Triple};
use crate::storage::node_tuple::NodeTupleTable;
use crate::storage::nodes::{NodeTable, SharedNodeTable};
use crate::storage::tuple::TupleTable;
use crate::types::{NodeId, NodeIdRef, Result, TdbError};

use super::prefixes;

/// Lazy triple results.
pub type TripleIter<'a> = Box<dyn Iterator<Item = Result<Triple>> + 'a>;
/// Lazy quad results.
pub type QuadIter<'a> = Box<dyn Iterator<Item = Result<Quad>> + 'a>;

/// Triple, quad and prefix tables over one node table.
///
/// Default-graph quads live in the triple table; the quad table holds named
/// graphs only.
#[derive(Clone)]
pub struct Dataset {
    triples: NodeTupleTable<SharedNodeTable>,
    quads: NodeTupleTable<SharedNodeTable>,
    prefixes: NodeTupleTable<SharedNodeTable>,
}

fn triple_row(row: Vec<Term>) -> Result<Triple> {
    let [s, p, o]: [Term; 3] = row
        .try_into()
        .map_err(|_| TdbError::Corruption("triple row has wrong arity"))?;
    Ok(Triple::new(s, p, o))
}

fn quad_row(row: Vec<Term>) -> Result<Quad> {
    let [g, s, p, o]: [Term; 4] = row
        .try_into()
        .map_err(|_| TdbError::Corruption("quad row has wrong arity"))?;
    Ok(Quad::new(g, s, p, o))
}

impl Dataset {
    /// Binds three tuple tables to `nodes`.
    pub fn new(nodes: SharedNodeTable, triples: TupleTable, quads: TupleTable, prefixes: TupleTable) -> Self {
        Self {
            triples: NodeTupleTable::new(nodes.clone(), triples),
            quads: NodeTupleTable::new(nodes.clone(), quads),
            prefixes: NodeTupleTable::new(nodes, prefixes),
        }
    }

    /// The same tuples addressed through another node table.
    pub fn rebind(&self, nodes: SharedNodeTable) -> Self {
        Self::new(
            nodes,
            self.triples.tuples().clone(),
            self.quads.tuples().clone(),
            self.prefixes.tuples().clone(),
        )
    }

    /// Node table the dataset resolves terms through.
    pub fn nodes(&self) -> &SharedNodeTable {
        self.triples.nodes()
    }

    /// Triple, quad and prefix tuple tables.
    pub fn tables(&self) -> [&TupleTable; 3] {
        [self.triples.tuples(), self.quads.tuples(), self.prefixes.tuples()]
    }

    pub(crate) fn tables_mut(&mut self) -> [&mut TupleTable; 3] {
        [
            self.triples.tuples_mut(),
            self.quads.tuples_mut(),
            self.prefixes.tuples_mut(),
        ]
    }

    /// Adds a quad; default-graph quads go to the triple table.
    pub fn add(&mut self, quad: &Quad) -> Result<bool> {
        if quad.graph.is_default_graph() {
            return self.triples.add(&[quad.subject.clone(), quad.predicate.clone(), quad.object.clone()]);
        }
        self.quads.add(&quad_terms(quad))
    }

    /// Deletes a quad.
    pub fn delete(&mut self, quad: &Quad) -> Result<bool> {
        if quad.graph.is_default_graph() {
            return self.triples.delete(&[quad.subject.clone(), quad.predicate.clone(), quad.object.clone()]);
        }
        self.quads.delete(&quad_terms(quad))
    }

    /// Returns true if the quad is stored.
    pub fn contains(&self, quad: &Quad) -> Result<bool> {
        if quad.graph.is_default_graph() {
            return self.triples.contains(&[quad.subject.clone(), quad.predicate.clone(), quad.object.clone()]);
        }
        self.quads.contains(&quad_terms(quad))
    }

    pub fn add_triple(&mut self, triple: &Triple) -> Result<bool> {
        self.triples.add(&triple_terms(triple))
    }

    pub fn delete_triple(&mut self, triple: &Triple) -> Result<bool> {
        self.triples.delete(&triple_terms(triple))
    }

    pub fn contains_triple(&self, triple: &Triple) -> Result<bool> {
        self.triples.contains(&triple_terms(triple))
    }

    /// Default-graph triples matching the pattern; `None` matches anything.
    pub fn find_triples(&self, s: Option<&Term>, p: Option<&Term>, o: Option<&Term>) -> Result<TripleIter<'_>> {
        let rows = self.triples.find(&[s, p, o])?;
        Ok(Box::new(rows.map(|row| row.and_then(triple_row))))
    }

    /// Quads matching the pattern.
    ///
    /// A `None` graph matches every named graph. Asking for the default graph
    /// returns the triple table's contents as quads.
    pub fn find_quads(
        &self,
        g: Option<&Term>,
        s: Option<&Term>,
        p: Option<&Term>,
        o: Option<&Term>,
    ) -> Result<QuadIter<'_>> {
        if g.is_some_and(Term::is_default_graph) {
            let triples = self.find_triples(s, p, o)?;
            return Ok(Box::new(triples.map(|t| t.map(Quad::in_default_graph))));
        }
        let rows = self.quads.find(&[g, s, p, o])?;
        Ok(Box::new(rows.map(|row| row.and_then(quad_row))))
    }

    /// Default-graph triple count.
    pub fn triple_count(&self) -> usize {
        self.triples.len()
    }

    /// Named-graph quad count.
    pub fn quad_count(&self) -> usize {
        self.quads.len()
    }

    /// Id of a stored term.
    pub fn node_id(&self, term: &Term) -> Result<NodeIdRef> {
        self.nodes().get_node_id_for_node(term)
    }

    /// Term stored under `id`.
    pub fn node(&self, id: NodeId) -> Result<Option<Term>> {
        self.nodes().get_node_for_node_id(id)
    }

    /// Declares `prefix` for `graph` (`None` = dataset-wide).
    pub fn set_prefix(&mut self, graph: Option<&Term>, prefix: &str, uri: &str) -> Result<bool> {
        prefixes::set(&mut self.prefixes, graph, prefix, uri)
    }

    /// Removes a prefix declaration.
    pub fn remove_prefix(&mut self, graph: Option<&Term>, prefix: &str) -> Result<bool> {
        prefixes::remove(&mut self.prefixes, graph, prefix)
    }

    /// Namespace declared for `prefix`.
    pub fn prefix(&self, graph: Option<&Term>, prefix: &str) -> Result<Option<String>> {
        prefixes::get(&self.prefixes, graph, prefix)
    }

    /// All prefix declarations of `graph`.
    pub fn prefixes(&self, graph: Option<&Term>) -> Result<Vec<(String, String)>> {
        prefixes::list(&self.prefixes, graph)
    }
}

fn triple_terms(triple: &Triple) -> [Term; 3] {
    [triple.subject.clone(), triple.predicate.clone(), triple.object.clone()]
}

fn quad_terms(quad: &Quad) -> [Term; 4] {
    [
        quad.graph.clone(),
        quad.subject.clone(),
        quad.predicate.clone(),
        quad.object.clone(),
    ]
}
