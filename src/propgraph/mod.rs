//! Property-graph projection of equivalence.
//!
//! Query-time lookups do not go through the graph tables. Assertions are
//! projected onto a property graph (nodes carrying `id` and `source`,
//! `IS_EQUIVALENT` relationships between them), and equivalent sets are
//! resolved with a bounded traversal over it.

/// In-memory property graph.
pub mod memory;
/// Feeds graph-update messages into the writer.
pub mod projector;
/// Bounded breadth-first resolution.
pub mod resolver;
/// Assertion projection.
pub mod writer;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::equivalence::Deadline;
use crate::error::StorageError;
use crate::id::Id;
use crate::resource::ResourceRef;

pub use memory::InMemoryPropertyGraph;
pub use projector::GraphUpdateProjector;
pub use resolver::BoundedEquivalentSetResolver;
pub use writer::EquivalenceWriter;

/// Hop limit of an equivalent-set traversal.
pub const MAX_DEPTH: usize = 8;

/// Relationship types stored in the property graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    #[serde(rename = "IS_EQUIVALENT")]
    IsEquivalent,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IsEquivalent => f.write_str("IS_EQUIVALENT"),
        }
    }
}

/// One subject's complete set of equivalence edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceEdges {
    pub subject: ResourceRef,
    /// Edge targets, the subject itself included.
    pub adjacents: BTreeSet<ResourceRef>,
}

/// Property-graph backend.
pub trait PropertyGraph: Send + Sync {
    /// Ids within `max_depth` `IS_EQUIVALENT` hops of `id`, ignoring edge
    /// direction, `id` included. Empty when `id` has no node.
    ///
    /// The whole traversal is one query against a single snapshot.
    fn equivalent_set(&self, id: Id, max_depth: usize, deadline: Deadline) -> Result<BTreeSet<Id>, StorageError>;

    /// Atomically merges every node in `edges`, creates the missing
    /// `IS_EQUIVALENT` edges and deletes the subject's other outgoing edges.
    fn write_equivalences(&self, edges: &EquivalenceEdges, deadline: Deadline) -> Result<(), StorageError>;
}
