//! Equivalence graphs and their store.
//!
//! An equivalence graph partitions resources published by different
//! sources into sets describing the same real-world item. Each member keeps
//! directed edges (who asserted what); the set itself is the undirected
//! connected component.

/// Checksummed blob framing for stored graphs.
pub mod codec;
/// Graph snapshots and the merge/split computation.
pub mod graph;
/// Serialized, lock-guarded graph updates.
pub mod store;
/// Index and blob tables.
pub mod tables;
/// Assertions and update results.
pub mod update;

pub use graph::{Adjacents, EquivalenceGraph};
pub use store::EquivalenceGraphStore;
pub use tables::{Deadline, GraphBatch, GraphTables, InMemoryGraphTables};
pub use update::{EquivalenceAssertion, EquivalenceGraphUpdate};
