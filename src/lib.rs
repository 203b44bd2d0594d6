//! # equivgraph - consistent equivalence graphs for aggregated metadata
//!
//! equivgraph tracks which records from different publishers describe the
//! same real-world item, and keeps that knowledge consistent while many
//! ingesters write concurrently.
//!
//! ## Core Concepts
//!
//! - **ResourceRef**: one publisher's record of an item, `(id, source)`
//! - **EquivalenceGraph**: a set of equivalent resources with the directed
//!   assertions that link them
//! - **EquivalenceGraphStore**: merges and splits graphs under an ordered
//!   multi-key lock
//! - **HashedWriter**: writes an entity only when its content hash changed
//! - **BoundedEquivalentSetResolver**: depth-bounded lookup of an item's
//!   equivalent set in a property graph
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! use equivgraph::config::{GraphStoreConfig, LockConfig};
//! use equivgraph::source::sources;
//! use equivgraph::{EquivalenceGraphStore, Id, InMemoryGraphTables, KeyedMultiLock, ResourceRef};
//!
//! let store = EquivalenceGraphStore::new(
//!     Arc::new(InMemoryGraphTables::new()),
//!     Arc::new(KeyedMultiLock::natural()),
//!     None,
//!     GraphStoreConfig::default(),
//!     LockConfig::default(),
//! )?;
//!
//! let considered = sources(["bbc.co.uk", "pa"]);
//! let bbc = ResourceRef::new(1, "bbc.co.uk");
//! let pa = ResourceRef::new(2, "pa");
//! store.update_equivalences(&bbc, &BTreeSet::from([pa]), &considered)?;
//!
//! let graphs = store.resolve_ids([Id::new(2)])?;
//! assert_eq!(graphs[&Id::new(2)].id(), Id::new(1));
//! # Ok::<(), equivgraph::EquivError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod hashing;
pub mod id;
pub mod resource;
pub mod source;

// Concurrency and write path
pub mod config;
pub mod lock;
pub mod notify;
pub mod write;

// Stores
pub mod entity;
pub mod equivalence;
pub mod propgraph;

pub use config::{ConsistencyLevel, EquivConfig};
pub use error::{EquivError, EquivResult, LockError, StorageError, ValidationError};
pub use hashing::{ContentHash, ContentHasher, Hashable};
pub use id::{Id, IdGenerator, Identified, SequenceIdGenerator};
pub use lock::{CancelToken, KeyedMultiLock, LockOptions, MultiLockGuard};
pub use resource::ResourceRef;
pub use source::{Publisher, SourceSet, Sourced};
pub use write::{EntityPersistence, HashedWriter, WritableEntity, WriteKey, WriteResult};

pub use entity::{Content, ContentStore, Described, Event, EventStore, InMemoryEntityTable, Topic, TopicStore};
pub use equivalence::{
    Adjacents, EquivalenceAssertion, EquivalenceGraph, EquivalenceGraphStore, EquivalenceGraphUpdate,
    GraphTables, InMemoryGraphTables,
};
pub use notify::{EquivalenceGraphUpdateMessage, MessageSender, Notifier, ResourceUpdatedMessage};
pub use propgraph::{
    BoundedEquivalentSetResolver, EquivalenceWriter, GraphUpdateProjector, InMemoryPropertyGraph, PropertyGraph,
    MAX_DEPTH,
};
