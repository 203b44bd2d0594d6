//! The equivalence graph store.
//!
//! Applies equivalence assertions under an ordered multi-key lock so that
//! every committed state has each resource in exactly one graph. A write
//! locks the ids it names plus every member of every graph those ids
//! currently belong to; writers with disjoint key sets proceed in parallel.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;

use crate::config::{GraphStoreConfig, LockConfig};
use crate::error::{EquivError, EquivResult, LockError, StorageError, ValidationError};
use crate::id::Id;
use crate::lock::{CancelToken, KeyedMultiLock, LockOptions, MultiLockGuard};
use crate::notify::{EquivalenceGraphUpdateMessage, GraphChange, Notifier};
use crate::resource::ResourceRef;
use crate::source::SourceSet;

use super::codec;
use super::graph::{self, Adjacents, EquivalenceGraph};
use super::tables::{Deadline, GraphBatch, GraphTables};
use super::update::{EquivalenceAssertion, EquivalenceGraphUpdate};

/// Index reads per id in `resolve_ids` before giving up on a moving row.
const RESOLVE_ATTEMPTS: u32 = 3;

/// Graphs currently holding a set of seed ids.
#[derive(Debug, Default)]
struct Snapshot {
    /// Keyed by graph id.
    graphs: BTreeMap<Id, Arc<EquivalenceGraph>>,
    /// Seeds plus every member of `graphs`.
    keys: BTreeSet<Id>,
}

impl Snapshot {
    fn graph_of(&self, id: Id) -> Option<&Arc<EquivalenceGraph>> {
        self.graphs.values().find(|g| g.contains(id))
    }
}

/// Reads, merges, splits and persists equivalence graphs.
pub struct EquivalenceGraphStore {
    tables: Arc<dyn GraphTables>,
    locks: Arc<KeyedMultiLock<Id>>,
    notifier: Option<Arc<Notifier<EquivalenceGraphUpdateMessage>>>,
    config: GraphStoreConfig,
    lock_config: LockConfig,
}

impl fmt::Debug for EquivalenceGraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquivalenceGraphStore")
            .field("config", &self.config)
            .field("lock_config", &self.lock_config)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl EquivalenceGraphStore {
    pub fn new(
        tables: Arc<dyn GraphTables>,
        locks: Arc<KeyedMultiLock<Id>>,
        notifier: Option<Arc<Notifier<EquivalenceGraphUpdateMessage>>>,
        config: GraphStoreConfig,
        lock_config: LockConfig,
    ) -> EquivResult<Self> {
        Ok(Self {
            tables,
            locks,
            notifier,
            config: config.validate()?,
            lock_config: lock_config.validate()?,
        })
    }

    /// Declares `subject` equivalent to exactly `asserted` among `considered`.
    ///
    /// Returns `None` when the subject's effective edges are unchanged; in
    /// that case nothing is persisted or published.
    pub fn update_equivalences(
        &self,
        subject: &ResourceRef,
        asserted: &BTreeSet<ResourceRef>,
        considered: &SourceSet,
    ) -> EquivResult<Option<EquivalenceGraphUpdate>> {
        let assertion = EquivalenceAssertion::new(subject.clone(), asserted.clone(), considered.clone());
        self.apply(&assertion, None)
    }

    /// As [`update_equivalences`](Self::update_equivalences), abandoning the
    /// lock wait once `cancel` fires.
    pub fn update_equivalences_cancellable(
        &self,
        assertion: &EquivalenceAssertion,
        cancel: &CancelToken,
    ) -> EquivResult<Option<EquivalenceGraphUpdate>> {
        self.apply(assertion, Some(cancel))
    }

    /// Applies a prepared assertion.
    pub fn apply(
        &self,
        assertion: &EquivalenceAssertion,
        cancel: Option<&CancelToken>,
    ) -> EquivResult<Option<EquivalenceGraphUpdate>> {
        assertion.validate()?;
        self.check_blocked(assertion)?;

        let started = Instant::now();
        let seeds = assertion.ids();
        let (guard, snapshot) = self.lock_stable_keys(&seeds, cancel)?;
        let outcome = self.update_locked(assertion, &snapshot);
        drop(guard);

        let elapsed = started.elapsed();
        if elapsed > self.config.slow_update() {
            tracing::warn!(
                subject = %assertion.subject,
                keys = snapshot.keys.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow equivalence update"
            );
        }

        let update = outcome?;
        if let Some(update) = &update {
            self.publish(update);
        }
        Ok(update)
    }

    /// Returns the current graph of each id. Ids with no graph are absent.
    ///
    /// Ids sharing a graph share one snapshot. The index and the graphs are
    /// read separately, so a merge or split committing in between can leave
    /// an id pointing at a deleted or rewritten graph; such ids are looked
    /// up again while their index row keeps moving.
    pub fn resolve_ids<I>(&self, ids: I) -> EquivResult<BTreeMap<Id, Arc<EquivalenceGraph>>>
    where
        I: IntoIterator<Item = Id>,
    {
        let mut pending: BTreeSet<Id> = ids.into_iter().collect();
        let mut out = BTreeMap::new();
        let mut last_seen: BTreeMap<Id, Id> = BTreeMap::new();

        for attempt in 1..=RESOLVE_ATTEMPTS {
            if pending.is_empty() {
                break;
            }
            let index = self
                .tables
                .read_index(&pending, self.config.read_consistency, self.deadline())?;
            let graphs = self.load_graphs(&index)?;

            let mut moved = BTreeSet::new();
            for (id, graph_id) in index {
                if let Some(graph) = graphs.get(&graph_id).filter(|g| g.contains(id)) {
                    out.insert(id, Arc::clone(graph));
                } else if last_seen.insert(id, graph_id) == Some(graph_id) {
                    tracing::debug!(%id, %graph_id, "ignoring stale index entry");
                } else {
                    moved.insert(id);
                }
            }
            if !moved.is_empty() {
                tracing::trace!(attempt, ids = ?moved, "index moved under read, re-reading");
            }
            pending = moved;
        }

        if !pending.is_empty() {
            tracing::debug!(ids = ?pending, "graph membership kept moving, omitting ids");
        }
        Ok(out)
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.backend_timeout())
    }

    fn check_blocked(&self, assertion: &EquivalenceAssertion) -> Result<(), ValidationError> {
        if self.config.blocked_ids.is_empty() {
            return Ok(());
        }
        let blocked: Vec<Id> = assertion
            .ids()
            .into_iter()
            .filter(|id| self.config.blocked_ids.contains(id))
            .collect();
        if blocked.is_empty() {
            Ok(())
        } else {
            tracing::warn!(subject = %assertion.subject, ?blocked, "assertion touches blocked resources");
            Err(ValidationError::BlockedResources { ids: blocked })
        }
    }

    fn load_graphs(&self, index: &BTreeMap<Id, Id>) -> Result<BTreeMap<Id, Arc<EquivalenceGraph>>, StorageError> {
        let graph_ids: BTreeSet<Id> = index.values().copied().collect();
        if graph_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let blobs = self
            .tables
            .read_graphs(&graph_ids, self.config.read_consistency, self.deadline())?;
        blobs
            .into_iter()
            .map(|(graph_id, blob)| {
                let graph: EquivalenceGraph = codec::decode(&blob)?;
                Ok((graph_id, Arc::new(graph)))
            })
            .collect()
    }

    fn snapshot(&self, seeds: &BTreeSet<Id>) -> Result<Snapshot, StorageError> {
        let index = self
            .tables
            .read_index(seeds, self.config.read_consistency, self.deadline())?;
        let mut loaded = self.load_graphs(&index)?;

        let live: BTreeSet<Id> = index
            .iter()
            .filter(|(id, graph_id)| loaded.get(graph_id).is_some_and(|g| g.contains(**id)))
            .map(|(_, graph_id)| *graph_id)
            .collect();
        loaded.retain(|graph_id, _| {
            let keep = live.contains(graph_id);
            if !keep {
                tracing::debug!(%graph_id, "ignoring graph reached only through stale index entries");
            }
            keep
        });

        let mut keys = seeds.clone();
        for graph in loaded.values() {
            keys.extend(graph.members());
        }
        Ok(Snapshot { graphs: loaded, keys })
    }

    /// Locks the seeds and every member of their graphs.
    ///
    /// Membership is read before locking, so it is re-read under the lock;
    /// if it grew in between, the enlarged set is locked on the next attempt.
    fn lock_stable_keys(
        &self,
        seeds: &BTreeSet<Id>,
        cancel: Option<&CancelToken>,
    ) -> EquivResult<(MultiLockGuard<'_, Id>, Snapshot)> {
        let options = LockOptions {
            timeout: self.lock_config.timeout(),
            cancel: cancel.cloned(),
        };
        let mut wanted = self.snapshot(seeds)?.keys;

        for attempt in 1..=self.lock_config.max_attempts {
            let guard = self.locks.lock_guard(wanted.iter(), &options)?;
            tracing::trace!(attempt, keys = wanted.len(), "locked equivalence keys");

            let snapshot = self.snapshot(seeds)?;
            if snapshot.keys.is_subset(&wanted) {
                return Ok((guard, snapshot));
            }

            drop(guard);
            tracing::debug!(attempt, "graph membership changed while locking, retrying");
            wanted.extend(snapshot.keys);
            thread::sleep(self.lock_config.retry_backoff());
        }

        Err(LockError::Contended {
            attempts: self.lock_config.max_attempts,
        }
        .into())
    }

    /// Members of loaded graphs with no index row.
    fn find_orphans(&self, snapshot: &Snapshot) -> Result<BTreeMap<Id, Id>, StorageError> {
        let members: BTreeSet<Id> = snapshot.graphs.values().flat_map(|g| g.members()).collect();
        let index = self
            .tables
            .read_index(&members, self.config.read_consistency, self.deadline())?;
        let mut orphans = BTreeMap::new();
        for graph in snapshot.graphs.values() {
            for member in graph.members() {
                if !index.contains_key(&member) {
                    orphans.insert(member, graph.id());
                }
            }
        }
        Ok(orphans)
    }

    fn update_locked(
        &self,
        assertion: &EquivalenceAssertion,
        snapshot: &Snapshot,
    ) -> EquivResult<Option<EquivalenceGraphUpdate>> {
        let subject = &assertion.subject;
        let efferent = assertion.effective_efferent();
        let orphans = self.find_orphans(snapshot)?;
        if !orphans.is_empty() {
            tracing::warn!(subject = %subject, orphans = ?orphans.keys().collect::<Vec<_>>(), "repairing orphaned graph members");
        }

        let current = snapshot
            .graph_of(subject.id)
            .and_then(|g| g.adjacents(subject.id))
            .map(|a| &a.efferent);
        if current == Some(&efferent) {
            if !orphans.is_empty() {
                let batch = GraphBatch {
                    put_index: orphans,
                    ..GraphBatch::default()
                };
                self.tables
                    .apply(batch, self.config.write_consistency, self.deadline())?;
            }
            tracing::debug!(subject = %subject, "equivalences unchanged");
            return Ok(None);
        }

        let loaded: BTreeMap<Id, Adjacents> = snapshot
            .graphs
            .values()
            .flat_map(|g| g.adjacency().iter().map(|(id, adj)| (*id, adj.clone())))
            .collect();
        let mut resulting = graph::reassert(loaded, subject, efferent, Utc::now());

        let mut batch = GraphBatch::default();
        for graph in &resulting {
            for member in graph.members() {
                batch.put_index.insert(member, graph.id());
            }
            if self.is_unchanged(snapshot, graph) {
                continue;
            }
            if graph.len() > self.config.large_graph_members {
                tracing::warn!(graph_id = %graph.id(), members = graph.len(), "large equivalence graph");
            }
            batch.put_graphs.insert(graph.id(), codec::encode(graph)?);
        }
        let resulting_ids: BTreeSet<Id> = resulting.iter().map(EquivalenceGraph::id).collect();
        let deleted: BTreeSet<Id> = snapshot
            .graphs
            .keys()
            .filter(|id| !resulting_ids.contains(id))
            .copied()
            .collect();
        batch.delete_graphs.clone_from(&deleted);

        self.tables
            .apply(batch, self.config.write_consistency, self.deadline())?;

        let subject_pos = resulting
            .iter()
            .position(|g| g.contains(subject.id))
            .ok_or_else(|| EquivError::internal("subject missing from resulting graphs"))?;
        let updated = resulting.remove(subject_pos);
        let created: Vec<EquivalenceGraph> = resulting
            .into_iter()
            .filter(|g| !self.is_unchanged(snapshot, g))
            .collect();

        tracing::debug!(
            subject = %subject,
            graph_id = %updated.id(),
            members = updated.len(),
            created = created.len(),
            deleted = deleted.len(),
            "equivalences updated"
        );

        Ok(Some(EquivalenceGraphUpdate {
            updated,
            created,
            deleted,
            assertion: assertion.clone(),
        }))
    }

    fn is_unchanged(&self, snapshot: &Snapshot, graph: &EquivalenceGraph) -> bool {
        snapshot
            .graphs
            .get(&graph.id())
            .is_some_and(|old| old.adjacency() == graph.adjacency())
    }

    fn publish(&self, update: &EquivalenceGraphUpdate) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let now = Utc::now();
        notifier.enqueue(EquivalenceGraphUpdateMessage {
            message_id: uuid::Uuid::new_v4(),
            timestamp: now,
            assertion: update.assertion.clone(),
            change: GraphChange::Updated,
            graph: update.updated.clone(),
            deleted_graph_ids: update.deleted.clone(),
        });
        for graph in &update.created {
            notifier.enqueue(EquivalenceGraphUpdateMessage {
                message_id: uuid::Uuid::new_v4(),
                timestamp: now,
                assertion: update.assertion.clone(),
                change: GraphChange::Created,
                graph: graph.clone(),
                deleted_graph_ids: BTreeSet::new(),
            });
        }
    }
}
