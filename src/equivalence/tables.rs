//! Graph persistence tables.
//!
//! Two logical tables back the graph store:
//! - an index `resource_id -> graph_id`
//! - the graphs themselves, `graph_id -> blob`
//!
//! A mutation is always a single [`GraphBatch`], applied atomically.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::config::ConsistencyLevel;
use crate::error::StorageError;
use crate::id::Id;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Point in time by which a backend call must complete.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Fails with [`StorageError::Timeout`] once the deadline has passed.
    pub fn check(&self, operation: &'static str) -> Result<(), StorageError> {
        if self.is_expired() {
            return Err(StorageError::Timeout {
                operation,
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

/// All changes of one graph mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphBatch {
    /// Encoded graphs to insert or overwrite, keyed by graph id.
    pub put_graphs: BTreeMap<Id, Vec<u8>>,
    /// Index rows to insert or overwrite.
    pub put_index: BTreeMap<Id, Id>,
    pub delete_graphs: BTreeSet<Id>,
}

impl GraphBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.put_graphs.is_empty() && self.put_index.is_empty() && self.delete_graphs.is_empty()
    }
}

/// Storage behind the equivalence graph store.
///
/// Implementations must give the lock holder read-your-writes at the
/// requested consistency level and must apply a batch all-or-nothing.
pub trait GraphTables: Send + Sync {
    /// Looks up the graph id of each resource. Unknown ids are absent.
    fn read_index(
        &self,
        ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Id>, StorageError>;

    /// Loads encoded graphs. Unknown graph ids are absent.
    fn read_graphs(
        &self,
        graph_ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Vec<u8>>, StorageError>;

    fn apply(&self, batch: GraphBatch, consistency: ConsistencyLevel, deadline: Deadline) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct TablesState {
    index: HashMap<Id, Id>,
    graphs: HashMap<Id, Vec<u8>>,
}

/// In-memory graph tables.
///
/// Every consistency level behaves as linearizable.
#[derive(Debug, Default)]
pub struct InMemoryGraphTables {
    state: RwLock<TablesState>,
}

impl InMemoryGraphTables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored graph blobs.
    pub fn graph_count(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().map_err(|_| lock_err("graph tables"))?.graphs.len())
    }

    /// Number of index rows.
    pub fn index_len(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().map_err(|_| lock_err("graph tables"))?.index.len())
    }

    /// Removes one index row, leaving its graph in place.
    pub fn remove_index_row(&self, id: Id) -> Result<Option<Id>, StorageError> {
        Ok(self
            .state
            .write()
            .map_err(|_| lock_err("graph tables"))?
            .index
            .remove(&id))
    }

    /// Overwrites one index row without touching graphs.
    pub fn put_index_row(&self, id: Id, graph_id: Id) -> Result<(), StorageError> {
        self.state
            .write()
            .map_err(|_| lock_err("graph tables"))?
            .index
            .insert(id, graph_id);
        Ok(())
    }

    /// Overwrites one graph blob without touching the index.
    pub fn put_graph_blob(&self, graph_id: Id, blob: Vec<u8>) -> Result<(), StorageError> {
        self.state
            .write()
            .map_err(|_| lock_err("graph tables"))?
            .graphs
            .insert(graph_id, blob);
        Ok(())
    }
}

impl GraphTables for InMemoryGraphTables {
    fn read_index(
        &self,
        ids: &BTreeSet<Id>,
        _consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Id>, StorageError> {
        deadline.check("read_index")?;
        let state = self.state.read().map_err(|_| lock_err("graph tables"))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.index.get(id).map(|g| (*id, *g)))
            .collect())
    }

    fn read_graphs(
        &self,
        graph_ids: &BTreeSet<Id>,
        _consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Vec<u8>>, StorageError> {
        deadline.check("read_graphs")?;
        let state = self.state.read().map_err(|_| lock_err("graph tables"))?;
        Ok(graph_ids
            .iter()
            .filter_map(|id| state.graphs.get(id).map(|blob| (*id, blob.clone())))
            .collect())
    }

    fn apply(&self, batch: GraphBatch, _consistency: ConsistencyLevel, deadline: Deadline) -> Result<(), StorageError> {
        deadline.check("apply")?;
        let mut state = self.state.write().map_err(|_| lock_err("graph tables"))?;
        for id in &batch.delete_graphs {
            state.graphs.remove(id);
        }
        state.graphs.extend(batch.put_graphs);
        state.index.extend(batch.put_index);
        Ok(())
    }
}
