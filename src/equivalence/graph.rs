//! Equivalence graph snapshots and the merge/split computation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::id::Id;
use crate::resource::ResourceRef;

/// Per-resource equivalence edges.
///
/// `efferent` holds the resources this subject asserts equivalence to,
/// `afferent` the resources asserting equivalence to it. Both always
/// contain the subject itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjacents {
    pub subject: ResourceRef,
    pub generated: DateTime<Utc>,
    pub efferent: BTreeSet<ResourceRef>,
    pub afferent: BTreeSet<ResourceRef>,
}

impl Adjacents {
    /// Adjacents with only the self edge.
    #[must_use]
    pub fn new(subject: ResourceRef, generated: DateTime<Utc>) -> Self {
        Self {
            efferent: BTreeSet::from([subject.clone()]),
            afferent: BTreeSet::from([subject.clone()]),
            subject,
            generated,
        }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.subject.id
    }

    /// Ids linked to the subject in either direction, the subject included.
    pub fn adjacent_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.efferent.iter().chain(self.afferent.iter()).map(|r| r.id)
    }
}

#[derive(Deserialize)]
struct GraphRepr {
    adjacency: BTreeMap<Id, Adjacents>,
    updated: DateTime<Utc>,
}

/// Immutable snapshot of one equivalence set.
///
/// The graph is named after its lowest member id. Every member maps to
/// its [`Adjacents`], and every edge stays inside the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquivalenceGraph {
    #[serde(skip)]
    id: Id,
    adjacency: BTreeMap<Id, Adjacents>,
    updated: DateTime<Utc>,
}

impl<'de> Deserialize<'de> for EquivalenceGraph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = GraphRepr::deserialize(deserializer)?;
        Self::from_adjacency(repr.adjacency, repr.updated).ok_or_else(|| D::Error::custom("graph has no members"))
    }
}

impl EquivalenceGraph {
    /// Builds a graph from its members. Returns `None` for an empty map.
    #[must_use]
    pub fn from_adjacency(adjacency: BTreeMap<Id, Adjacents>, updated: DateTime<Utc>) -> Option<Self> {
        let id = *adjacency.keys().next()?;
        Some(Self { id, adjacency, updated })
    }

    /// A graph holding a single resource equivalent only to itself.
    #[must_use]
    pub fn singleton(subject: ResourceRef, updated: DateTime<Utc>) -> Self {
        let id = subject.id;
        Self {
            id,
            adjacency: BTreeMap::from([(id, Adjacents::new(subject, updated))]),
            updated,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub const fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    #[must_use]
    pub const fn adjacency(&self) -> &BTreeMap<Id, Adjacents> {
        &self.adjacency
    }

    #[must_use]
    pub fn adjacents(&self, id: Id) -> Option<&Adjacents> {
        self.adjacency.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: Id) -> bool {
        self.adjacency.contains_key(&id)
    }

    /// Member ids in ascending order.
    pub fn members(&self) -> impl Iterator<Item = Id> + '_ {
        self.adjacency.keys().copied()
    }

    /// Member resources in id order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceRef> + '_ {
        self.adjacency.values().map(|a| &a.subject)
    }

    /// The equivalence set: every member id.
    #[must_use]
    pub fn equivalence_set(&self) -> BTreeSet<Id> {
        self.members().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }
}

/// Replaces `subject`'s efferent edges, recomputes every afferent set and
/// partitions the result into connected components.
///
/// `loaded` must hold every member of every graph the assertion touches.
/// Targets of `efferent` missing from `loaded` join as new singletons. The
/// returned graphs cover every resource in `loaded` plus those new ones,
/// each resource in exactly one graph, ordered by graph id.
#[must_use]
pub fn reassert(
    mut loaded: BTreeMap<Id, Adjacents>,
    subject: &ResourceRef,
    efferent: BTreeSet<ResourceRef>,
    now: DateTime<Utc>,
) -> Vec<EquivalenceGraph> {
    for target in &efferent {
        loaded
            .entry(target.id)
            .or_insert_with(|| Adjacents::new(target.clone(), now));
    }
    let entry = loaded
        .entry(subject.id)
        .or_insert_with(|| Adjacents::new(subject.clone(), now));
    entry.efferent = efferent;
    entry.efferent.insert(entry.subject.clone());
    entry.generated = now;

    recompute_afferents(&mut loaded, now);
    partition(loaded, now)
}

fn recompute_afferents(adjacency: &mut BTreeMap<Id, Adjacents>, now: DateTime<Utc>) {
    // Edges never leave a graph: drop any pointing at a non-member.
    let members: BTreeSet<Id> = adjacency.keys().copied().collect();
    for adj in adjacency.values_mut() {
        adj.efferent.retain(|target| {
            let member = members.contains(&target.id);
            if !member {
                tracing::warn!(subject = %adj.subject, target = %target, "dropping edge to unloaded resource");
            }
            member
        });
    }

    let mut incoming: BTreeMap<Id, BTreeSet<ResourceRef>> = BTreeMap::new();
    for adj in adjacency.values() {
        for target in &adj.efferent {
            incoming.entry(target.id).or_default().insert(adj.subject.clone());
        }
    }

    for (id, adj) in adjacency.iter_mut() {
        let mut afferent = incoming.remove(id).unwrap_or_default();
        afferent.insert(adj.subject.clone());
        if afferent != adj.afferent {
            adj.afferent = afferent;
            adj.generated = now;
        }
    }
}

/// Splits `adjacency` into connected components, treating every edge as
/// undirected.
#[must_use]
pub fn partition(mut adjacency: BTreeMap<Id, Adjacents>, now: DateTime<Utc>) -> Vec<EquivalenceGraph> {
    let mut graphs = Vec::new();
    while let Some((&start, _)) = adjacency.first_key_value() {
        let mut component = BTreeMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            let Some(adj) = adjacency.remove(&id) else {
                continue;
            };
            queue.extend(adj.adjacent_ids().filter(|n| adjacency.contains_key(n)));
            component.insert(id, adj);
        }
        if let Some(graph) = EquivalenceGraph::from_adjacency(component, now) {
            graphs.push(graph);
        }
    }
    graphs
}
