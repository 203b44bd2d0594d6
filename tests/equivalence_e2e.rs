use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use equivgraph::config::{ConsistencyLevel, GraphStoreConfig, LockConfig, NotifierConfig, ResolverConfig};
use equivgraph::equivalence::{Deadline, GraphBatch};
use equivgraph::notify::ChannelSender;
use equivgraph::source::sources;
use equivgraph::{
    BoundedEquivalentSetResolver, EquivalenceGraphStore, EquivalenceGraphUpdateMessage, EquivalenceWriter,
    GraphTables, GraphUpdateProjector, Id, InMemoryGraphTables, InMemoryPropertyGraph, KeyedMultiLock, Notifier,
    PropertyGraph, ResourceRef, SourceSet, StorageError,
};

fn r(id: u64) -> ResourceRef {
    ResourceRef::new(id, "pa")
}

fn refs(ids: &[u64]) -> BTreeSet<ResourceRef> {
    ids.iter().map(|&i| r(i)).collect()
}

fn pa() -> SourceSet {
    sources(["pa"])
}

fn store_on(tables: Arc<dyn GraphTables>) -> EquivalenceGraphStore {
    EquivalenceGraphStore::new(
        tables,
        Arc::new(KeyedMultiLock::natural()),
        None,
        GraphStoreConfig::default(),
        LockConfig::default(),
    )
    .unwrap()
}

fn set_of(store: &EquivalenceGraphStore, id: u64) -> Vec<u64> {
    store
        .resolve_ids([Id::new(id)])
        .unwrap()
        .get(&Id::new(id))
        .map(|g| g.members().map(Id::as_u64).collect())
        .unwrap_or_default()
}

/// Graph tables whose `apply` parks until released once a batch deletes
/// the watched graph.
struct GatedTables {
    inner: InMemoryGraphTables,
    watched: Id,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl GraphTables for GatedTables {
    fn read_index(
        &self,
        ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Id>, StorageError> {
        self.inner.read_index(ids, consistency, deadline)
    }

    fn read_graphs(
        &self,
        graph_ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Vec<u8>>, StorageError> {
        self.inner.read_graphs(graph_ids, consistency, deadline)
    }

    fn apply(&self, batch: GraphBatch, consistency: ConsistencyLevel, deadline: Deadline) -> Result<(), StorageError> {
        if batch.delete_graphs.contains(&self.watched) {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
        }
        self.inner.apply(batch, consistency, deadline)
    }
}

/// Graph tables that refuse every batch while `failing` is set.
struct FlakyTables {
    inner: InMemoryGraphTables,
    failing: AtomicBool,
}

impl GraphTables for FlakyTables {
    fn read_index(
        &self,
        ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Id>, StorageError> {
        self.inner.read_index(ids, consistency, deadline)
    }

    fn read_graphs(
        &self,
        graph_ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Vec<u8>>, StorageError> {
        self.inner.read_graphs(graph_ids, consistency, deadline)
    }

    fn apply(&self, batch: GraphBatch, consistency: ConsistencyLevel, deadline: Deadline) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("coordinator down".to_string()));
        }
        self.inner.apply(batch, consistency, deadline)
    }
}

#[test]
fn equivalence_is_transitive() {
    let store = store_on(Arc::new(InMemoryGraphTables::new()));
    store.update_equivalences(&r(1), &refs(&[2]), &pa()).unwrap();
    store.update_equivalences(&r(2), &refs(&[3]), &pa()).unwrap();

    for id in 1..=3 {
        assert_eq!(set_of(&store, id), vec![1, 2, 3]);
    }
}

#[test]
fn chained_assertions_merge_into_one_graph() {
    let store = store_on(Arc::new(InMemoryGraphTables::new()));
    store.update_equivalences(&r(1), &refs(&[2]), &pa()).unwrap();
    store.update_equivalences(&r(3), &refs(&[4]), &pa()).unwrap();
    assert_eq!(set_of(&store, 1), vec![1, 2]);
    assert_eq!(set_of(&store, 4), vec![3, 4]);

    let update = store
        .update_equivalences(&r(2), &refs(&[3]), &pa())
        .unwrap()
        .unwrap();
    assert_eq!(update.updated.id(), Id::new(1));
    assert_eq!(update.deleted, BTreeSet::from([Id::new(3)]));

    let graphs = store.resolve_ids((1..=4).map(Id::new)).unwrap();
    assert_eq!(graphs.len(), 4);
    for graph in graphs.values() {
        assert_eq!(graph.members().map(Id::as_u64).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }
}

#[test]
fn retracting_every_edge_splits_into_singletons() {
    let store = store_on(Arc::new(InMemoryGraphTables::new()));
    store.update_equivalences(&r(1), &refs(&[2]), &pa()).unwrap();
    store.update_equivalences(&r(2), &refs(&[3]), &pa()).unwrap();

    // 2 -> 3 still holds 2 and 3 together.
    let update = store
        .update_equivalences(&r(1), &BTreeSet::new(), &pa())
        .unwrap()
        .unwrap();
    assert_eq!(update.updated.equivalence_set(), BTreeSet::from([Id::new(1)]));
    assert_eq!(update.created.len(), 1);
    assert_eq!(set_of(&store, 3), vec![2, 3]);

    let update = store
        .update_equivalences(&r(2), &BTreeSet::new(), &pa())
        .unwrap()
        .unwrap();
    assert_eq!(update.updated.id(), Id::new(2));
    assert_eq!(update.created.iter().map(|g| g.id()).collect::<Vec<_>>(), vec![Id::new(3)]);
    assert_eq!(update.deleted, BTreeSet::new());

    for id in 1..=3 {
        assert_eq!(set_of(&store, id), vec![id]);
    }
}

#[test]
fn edges_to_ignored_publishers_never_join_the_graph() {
    let store = store_on(Arc::new(InMemoryGraphTables::new()));
    let asserted = BTreeSet::from([ResourceRef::new(2, "bbc.co.uk"), ResourceRef::new(3, "c4")]);
    store
        .update_equivalences(&r(1), &asserted, &sources(["pa", "bbc.co.uk"]))
        .unwrap();

    assert_eq!(set_of(&store, 1), vec![1, 2]);
    assert!(set_of(&store, 3).is_empty());
}

#[test]
fn dropping_a_source_from_consideration_retracts_its_edges() {
    let store = store_on(Arc::new(InMemoryGraphTables::new()));
    let bbc = ResourceRef::new(2, "bbc.co.uk");
    store
        .update_equivalences(&r(1), &BTreeSet::from([bbc.clone(), r(3)]), &sources(["pa", "bbc.co.uk"]))
        .unwrap();
    assert_eq!(set_of(&store, 1), vec![1, 2, 3]);

    // Same claim, but bbc.co.uk is no longer considered.
    store
        .update_equivalences(&r(1), &BTreeSet::from([bbc, r(3)]), &pa())
        .unwrap();
    assert_eq!(set_of(&store, 1), vec![1, 3]);
    assert_eq!(set_of(&store, 2), vec![2]);
}

#[test]
fn disjoint_updates_proceed_while_another_is_in_flight() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let tables = Arc::new(GatedTables {
        inner: InMemoryGraphTables::new(),
        watched: Id::new(3),
        entered: entered_tx,
        release: release_rx,
    });
    let store = Arc::new(store_on(tables));
    store.update_equivalences(&r(1), &refs(&[2]), &pa()).unwrap();
    store.update_equivalences(&r(3), &refs(&[4]), &pa()).unwrap();

    // Merging 2 and 3 deletes graph 3 and parks inside the write.
    let merging = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.update_equivalences(&r(2), &refs(&[3]), &pa()).unwrap())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Readers see the state before the merge, never a partial one.
    let graphs = store.resolve_ids((1..=4).map(Id::new)).unwrap();
    assert_eq!(graphs[&Id::new(1)].id(), Id::new(1));
    assert_eq!(graphs[&Id::new(2)].id(), Id::new(1));
    assert_eq!(graphs[&Id::new(3)].id(), Id::new(3));
    assert_eq!(graphs[&Id::new(4)].id(), Id::new(3));

    // A writer on unrelated ids is not blocked.
    let (done_tx, done_rx) = unbounded();
    let disjoint = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store.update_equivalences(&r(10), &refs(&[11]), &pa()).unwrap();
            done_tx.send(()).unwrap();
        })
    };
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    disjoint.join().unwrap();
    assert_eq!(set_of(&store, 11), vec![10, 11]);

    // A writer touching the merging graphs waits for it.
    let (overlap_tx, overlap_rx) = unbounded();
    let overlapping = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store.update_equivalences(&r(4), &refs(&[5]), &pa()).unwrap();
            overlap_tx.send(()).unwrap();
        })
    };
    assert!(overlap_rx.recv_timeout(Duration::from_millis(150)).is_err());

    release_tx.send(()).unwrap();
    let update = merging.join().unwrap().unwrap();
    assert_eq!(update.updated.equivalence_set().len(), 4);
    overlap_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    overlapping.join().unwrap();

    for id in 1..=5 {
        assert_eq!(set_of(&store, id), vec![1, 2, 3, 4, 5]);
    }
}

#[test]
fn overlapping_concurrent_writers_keep_graphs_consistent() {
    // Heavy churn on 16 ids can grow a key set several times in a row.
    let lock_config = LockConfig {
        max_attempts: 64,
        ..LockConfig::default()
    };
    let store = Arc::new(
        EquivalenceGraphStore::new(
            Arc::new(InMemoryGraphTables::new()),
            Arc::new(KeyedMultiLock::natural()),
            None,
            GraphStoreConfig::default(),
            lock_config,
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut seed = 0x2545_F491_4F6C_DD1Du64 ^ (t + 1);
                let mut next = move || {
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;
                    seed
                };
                for _ in 0..60 {
                    let subject = next() % 16;
                    let asserted: Vec<u64> = (0..next() % 3).map(|_| next() % 16).collect();
                    store.update_equivalences(&r(subject), &refs(&asserted), &pa()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let graphs = store.resolve_ids((0..16).map(Id::new)).unwrap();
    for (id, graph) in &graphs {
        assert!(graph.contains(*id));
        for member in graph.members() {
            // Every member points back at the same graph.
            assert_eq!(graphs[&member].id(), graph.id());
            let adj = graph.adjacents(member).unwrap();
            assert!(adj.adjacent_ids().all(|n| graph.contains(n)));
        }
        assert_eq!(graph.id(), graph.members().min().unwrap());
    }
}

#[test]
fn failed_write_leaves_state_untouched() {
    let tables = Arc::new(FlakyTables {
        inner: InMemoryGraphTables::new(),
        failing: AtomicBool::new(false),
    });
    let (tx, rx) = unbounded::<EquivalenceGraphUpdateMessage>();
    let notifier = Arc::new(Notifier::start(NotifierConfig::default(), Arc::new(ChannelSender::new(tx))).unwrap());
    let store = EquivalenceGraphStore::new(
        Arc::clone(&tables) as Arc<dyn GraphTables>,
        Arc::new(KeyedMultiLock::natural()),
        Some(notifier),
        GraphStoreConfig::default(),
        LockConfig::default(),
    )
    .unwrap();

    store.update_equivalences(&r(1), &refs(&[2]), &pa()).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    tables.failing.store(true, Ordering::SeqCst);
    let err = store.update_equivalences(&r(2), &refs(&[3]), &pa()).unwrap_err();
    assert!(err.is_storage());
    assert!(err.is_retryable());
    assert_eq!(set_of(&store, 2), vec![1, 2]);
    assert!(set_of(&store, 3).is_empty());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    // The keys were released and the same call now succeeds.
    tables.failing.store(false, Ordering::SeqCst);
    store.update_equivalences(&r(2), &refs(&[3]), &pa()).unwrap();
    assert_eq!(set_of(&store, 3), vec![1, 2, 3]);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().graph.len(), 3);
}

#[test]
fn property_graph_follows_the_store() {
    let property_graph = Arc::new(InMemoryPropertyGraph::new());
    let writer = Arc::new(EquivalenceWriter::new(
        Arc::clone(&property_graph) as Arc<dyn PropertyGraph>,
        Duration::from_secs(5),
    ));
    let notifier = Arc::new(
        Notifier::start(NotifierConfig::default(), Arc::new(GraphUpdateProjector::new(writer))).unwrap(),
    );
    let store = EquivalenceGraphStore::new(
        Arc::new(InMemoryGraphTables::new()),
        Arc::new(KeyedMultiLock::natural()),
        Some(Arc::clone(&notifier)),
        GraphStoreConfig::default(),
        LockConfig::default(),
    )
    .unwrap();

    store.update_equivalences(&r(1), &refs(&[2]), &pa()).unwrap();
    store.update_equivalences(&r(3), &refs(&[4]), &pa()).unwrap();
    store.update_equivalences(&r(2), &refs(&[3]), &pa()).unwrap();
    store.update_equivalences(&r(1), &BTreeSet::new(), &pa()).unwrap();

    // bbc.co.uk drops out of consideration for 5's second assertion.
    let bbc = BTreeSet::from([ResourceRef::new(6, "bbc.co.uk")]);
    store
        .update_equivalences(&r(5), &bbc, &sources(["pa", "bbc.co.uk"]))
        .unwrap();
    store.update_equivalences(&r(5), &bbc, &pa()).unwrap();
    notifier.shutdown();

    let stats = notifier.stats();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.dropped, 0);

    let resolver =
        BoundedEquivalentSetResolver::new(property_graph as Arc<dyn PropertyGraph>, ResolverConfig::default()).unwrap();
    for id in 1..=6 {
        let from_store: BTreeSet<Id> = store
            .resolve_ids([Id::new(id)])
            .unwrap()
            .get(&Id::new(id))
            .map(|g| g.equivalence_set())
            .unwrap_or_default();
        assert_eq!(resolver.get_equivalent_set(Id::new(id)).unwrap(), from_store);
    }
    assert_eq!(
        resolver.get_equivalent_set(Id::new(3)).unwrap(),
        BTreeSet::from([Id::new(2), Id::new(3), Id::new(4)])
    );
    assert_eq!(resolver.get_equivalent_set(Id::new(5)).unwrap(), BTreeSet::from([Id::new(5)]));
}

/// Graph tables that park the first `read_graphs` after being armed.
struct ParkedReadTables {
    inner: InMemoryGraphTables,
    armed: AtomicBool,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl GraphTables for ParkedReadTables {
    fn read_index(
        &self,
        ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Id>, StorageError> {
        self.inner.read_index(ids, consistency, deadline)
    }

    fn read_graphs(
        &self,
        graph_ids: &BTreeSet<Id>,
        consistency: ConsistencyLevel,
        deadline: Deadline,
    ) -> Result<BTreeMap<Id, Vec<u8>>, StorageError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
        }
        self.inner.read_graphs(graph_ids, consistency, deadline)
    }

    fn apply(&self, batch: GraphBatch, consistency: ConsistencyLevel, deadline: Deadline) -> Result<(), StorageError> {
        self.inner.apply(batch, consistency, deadline)
    }
}

#[test]
fn reader_racing_a_merge_still_finds_the_resource() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let tables = Arc::new(ParkedReadTables {
        inner: InMemoryGraphTables::new(),
        armed: AtomicBool::new(false),
        entered: entered_tx,
        release: release_rx,
    });
    let store = Arc::new(store_on(Arc::clone(&tables) as Arc<dyn GraphTables>));
    store.update_equivalences(&r(1), &refs(&[2]), &pa()).unwrap();
    store.update_equivalences(&r(3), &refs(&[4]), &pa()).unwrap();

    // The reader sees 3 -> graph 3 in the index, then parks.
    tables.armed.store(true, Ordering::SeqCst);
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.resolve_ids([Id::new(3)]).unwrap())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Graph 3 is merged into graph 1 and deleted before the reader resumes.
    let update = store
        .update_equivalences(&r(2), &refs(&[3]), &pa())
        .unwrap()
        .unwrap();
    assert_eq!(update.deleted, BTreeSet::from([Id::new(3)]));
    release_tx.send(()).unwrap();

    let seen = reader.join().unwrap();
    let graph = seen.get(&Id::new(3)).expect("resource 3 resolved");
    assert_eq!(graph.id(), Id::new(1));
    assert_eq!(graph.len(), 4);
}
