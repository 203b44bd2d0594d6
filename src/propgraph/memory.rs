//! In-memory property graph backed by a petgraph `DiGraphMap`.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;

use crate::equivalence::Deadline;
use crate::error::StorageError;
use crate::id::Id;
use crate::resource::ResourceRef;
use crate::source::Publisher;

use super::{EquivalenceEdges, PropertyGraph, Relationship};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct GraphState {
    edges: DiGraphMap<Id, Relationship>,
    sources: HashMap<Id, Publisher>,
}

impl GraphState {
    fn merge_node(&mut self, r: &ResourceRef) -> Result<(), StorageError> {
        match self.sources.get(&r.id) {
            Some(existing) if existing != &r.source => Err(StorageError::Rejected(format!(
                "node {} already exists with source {existing}, not {}",
                r.id, r.source
            ))),
            Some(_) => Ok(()),
            None => {
                self.sources.insert(r.id, r.source.clone());
                self.edges.add_node(r.id);
                Ok(())
            }
        }
    }

    fn resource(&self, id: Id) -> Option<ResourceRef> {
        self.sources.get(&id).map(|s| ResourceRef::new(id, s.clone()))
    }
}

/// Thread-safe in-memory [`PropertyGraph`].
#[derive(Debug, Default)]
pub struct InMemoryPropertyGraph {
    state: RwLock<GraphState>,
}

impl InMemoryPropertyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and an edge directly, bypassing the assertion rules.
    /// Intended for seeding fixtures.
    pub fn insert_edge(&self, from: &ResourceRef, to: &ResourceRef) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("property graph"))?;
        state.merge_node(from)?;
        state.merge_node(to)?;
        state.edges.add_edge(from.id, to.id, Relationship::IsEquivalent);
        Ok(())
    }

    pub fn insert_node(&self, node: &ResourceRef) -> Result<(), StorageError> {
        self.state
            .write()
            .map_err(|_| lock_err("property graph"))?
            .merge_node(node)
    }

    pub fn edge_count(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().map_err(|_| lock_err("property graph"))?.edges.edge_count())
    }

    /// Targets of `id`'s outgoing `IS_EQUIVALENT` edges.
    pub fn outgoing_equivalents(&self, id: Id) -> Result<BTreeSet<ResourceRef>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("property graph"))?;
        if !state.edges.contains_node(id) {
            return Ok(BTreeSet::new());
        }
        Ok(state
            .edges
            .neighbors_directed(id, Direction::Outgoing)
            .filter_map(|n| state.resource(n))
            .collect())
    }

    pub fn contains_node(&self, id: Id) -> Result<bool, StorageError> {
        Ok(self
            .state
            .read()
            .map_err(|_| lock_err("property graph"))?
            .sources
            .contains_key(&id))
    }
}

impl PropertyGraph for InMemoryPropertyGraph {
    fn equivalent_set(&self, id: Id, max_depth: usize, deadline: Deadline) -> Result<BTreeSet<Id>, StorageError> {
        deadline.check("equivalent_set")?;
        let state = self.state.read().map_err(|_| lock_err("property graph"))?;
        if !state.edges.contains_node(id) {
            return Ok(BTreeSet::new());
        }

        let mut seen = BTreeSet::from([id]);
        let mut frontier = vec![id];
        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for &node in &frontier {
                for dir in [Direction::Outgoing, Direction::Incoming] {
                    next.extend(state.edges.neighbors_directed(node, dir).filter(|n| seen.insert(*n)));
                }
            }
            frontier = next;
        }
        Ok(seen)
    }

    fn write_equivalences(&self, edges: &EquivalenceEdges, deadline: Deadline) -> Result<(), StorageError> {
        deadline.check("write_equivalences")?;
        let mut state = self.state.write().map_err(|_| lock_err("property graph"))?;

        // Validate every node before mutating anything.
        for r in edges.adjacents.iter().chain(std::iter::once(&edges.subject)) {
            if let Some(existing) = state.sources.get(&r.id) {
                if existing != &r.source {
                    return Err(StorageError::Rejected(format!(
                        "node {} already exists with source {existing}, not {}",
                        r.id, r.source
                    )));
                }
            }
        }

        state.merge_node(&edges.subject)?;
        let subject = edges.subject.id;
        for target in &edges.adjacents {
            state.merge_node(target)?;
            state.edges.add_edge(subject, target.id, Relationship::IsEquivalent);
        }

        let retracted: Vec<Id> = state
            .edges
            .neighbors_directed(subject, Direction::Outgoing)
            .filter(|n| !edges.adjacents.iter().any(|a| a.id == *n))
            .collect();
        for target in retracted {
            state.edges.remove_edge(subject, target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn pa(id: u64) -> ResourceRef {
        ResourceRef::new(id, "pa")
    }

    #[test]
    fn traversal_is_undirected() {
        let g = InMemoryPropertyGraph::new();
        g.insert_edge(&pa(1), &pa(2)).unwrap();
        g.insert_edge(&pa(3), &pa(2)).unwrap();
        let set = g.equivalent_set(Id::new(2), 1, deadline()).unwrap();
        assert_eq!(set, BTreeSet::from([Id::new(1), Id::new(2), Id::new(3)]));
    }

    #[test]
    fn traversal_stops_at_depth() {
        let g = InMemoryPropertyGraph::new();
        for i in 0..5 {
            g.insert_edge(&pa(i), &pa(i + 1)).unwrap();
        }
        let set = g.equivalent_set(Id::new(0), 2, deadline()).unwrap();
        assert_eq!(set, BTreeSet::from([Id::new(0), Id::new(1), Id::new(2)]));
        assert!(g.equivalent_set(Id::new(99), 2, deadline()).unwrap().is_empty());
    }

    #[test]
    fn write_replaces_every_outgoing_edge() {
        let g = InMemoryPropertyGraph::new();
        let subject = pa(1);
        g.insert_edge(&subject, &ResourceRef::new(2, "bbc.co.uk")).unwrap();
        g.insert_edge(&subject, &ResourceRef::new(3, "c4")).unwrap();
        g.insert_edge(&ResourceRef::new(3, "c4"), &subject).unwrap();

        let edges = EquivalenceEdges {
            subject: subject.clone(),
            adjacents: BTreeSet::from([subject, ResourceRef::new(4, "bbc.co.uk")]),
        };
        g.write_equivalences(&edges, deadline()).unwrap();

        let out: Vec<u64> = g
            .outgoing_equivalents(Id::new(1))
            .unwrap()
            .iter()
            .map(|r| r.id.as_u64())
            .collect();
        assert_eq!(out, vec![1, 4]);
        // Edges asserted by others are untouched.
        assert_eq!(g.outgoing_equivalents(Id::new(3)).unwrap().len(), 1);
    }

    #[test]
    fn conflicting_source_is_rejected_atomically() {
        let g = InMemoryPropertyGraph::new();
        g.insert_node(&ResourceRef::new(2, "bbc.co.uk")).unwrap();
        let subject = pa(1);
        let edges = EquivalenceEdges {
            subject: subject.clone(),
            adjacents: BTreeSet::from([subject, pa(2)]),
        };
        assert!(matches!(g.write_equivalences(&edges, deadline()), Err(StorageError::Rejected(_))));
        assert!(!g.contains_node(Id::new(1)).unwrap());
    }
}
