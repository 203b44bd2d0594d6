//! Resource identifiers and id allocation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Stable numeric identifier of a stored resource.
///
/// Ids are totally ordered; that order is the lock acquisition order and
/// the lowest member id names an equivalence graph.
///
/// # Examples
///
/// ```
/// use equivgraph::Id;
///
/// let a = Id::new(1);
/// let b = Id::new(2);
/// assert!(a < b);
/// assert_eq!(a.as_u64(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    /// Creates an id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Id {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Id> for u64 {
    fn from(id: Id) -> Self {
        id.0
    }
}

/// Capability: a record that may carry a stored id.
///
/// Candidates arriving from ingestion usually have no id yet; the writer
/// assigns one on first write.
pub trait Identified {
    fn id(&self) -> Option<Id>;
    fn set_id(&mut self, id: Id);
}

/// Allocates ids for resources written for the first time.
pub trait IdGenerator: Send + Sync {
    /// Returns a fresh, never previously returned id.
    fn generate(&self) -> Id;
}

/// Monotonic in-process id sequence.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    next: AtomicU64,
}

impl SequenceIdGenerator {
    /// Creates a sequence whose first id is `start`.
    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> Id {
        Id(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
