//! Hash-guarded entity writes.
//!
//! [`HashedWriter`] is the one write path shared by every entity store:
//! resolve the stored version, compare content hashes, persist only when
//! something changed, and announce the change. Stores differ only in the
//! entity type and the [`EntityPersistence`] they plug in.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{EquivError, EquivResult, StorageError};
use crate::hashing::Hashable;
use crate::id::{Id, IdGenerator, Identified};
use crate::lock::{KeyedMultiLock, LockOptions};
use crate::notify::{Notifier, ResourceUpdatedMessage};
use crate::resource::ResourceRef;
use crate::source::{Publisher, Sourced};

/// Outcome of a write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult<T> {
    /// The stored version after the call. When nothing was written this is
    /// the previously stored record, unchanged.
    pub resource: T,
    pub previous: Option<T>,
    pub written: bool,
    pub write_time: DateTime<Utc>,
}

/// An entity that can go through the hashed write path.
pub trait WritableEntity: Hashable + Identified + Sourced + Clone + Send + Sync + 'static {
    /// Publisher-local alternative keys used to find a stored version when
    /// the candidate carries no id.
    fn aliases(&self) -> &BTreeSet<String>;

    fn first_seen(&self) -> Option<DateTime<Utc>>;
    fn set_first_seen(&mut self, at: DateTime<Utc>);
    fn set_last_updated(&mut self, at: DateTime<Utc>);
}

/// Entity storage used by [`HashedWriter`].
pub trait EntityPersistence<T>: Send + Sync {
    fn resolve_by_id(&self, id: Id) -> Result<Option<T>, StorageError>;

    /// Finds a stored record from `source` carrying any of `aliases`.
    fn resolve_by_alias(&self, source: &Publisher, aliases: &BTreeSet<String>) -> Result<Option<T>, StorageError>;

    fn persist(&self, entity: &T, previous: Option<&T>) -> Result<(), StorageError>;
}

/// Key serialising writes that could resolve to the same stored record.
///
/// A lock table of these can be shared by every writer of one entity table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WriteKey {
    Id(Id),
    Alias(Publisher, String),
}

/// Generic write-only-if-changed pipeline.
pub struct HashedWriter<T> {
    persistence: Arc<dyn EntityPersistence<T>>,
    ids: Arc<dyn IdGenerator>,
    notifier: Option<Arc<Notifier<ResourceUpdatedMessage>>>,
    locks: Arc<KeyedMultiLock<WriteKey>>,
    lock_options: LockOptions,
}

impl<T> fmt::Debug for HashedWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedWriter")
            .field("notifier", &self.notifier.is_some())
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl<T: WritableEntity> HashedWriter<T> {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn EntityPersistence<T>>,
        ids: Arc<dyn IdGenerator>,
        notifier: Option<Arc<Notifier<ResourceUpdatedMessage>>>,
        locks: Arc<KeyedMultiLock<WriteKey>>,
    ) -> Self {
        Self {
            persistence,
            ids,
            notifier,
            locks,
            lock_options: LockOptions::default(),
        }
    }

    /// Bounds how long a write waits behind a concurrent write of the same
    /// record.
    #[must_use]
    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    fn write_keys(candidate: &T) -> Vec<WriteKey> {
        match candidate.id() {
            Some(id) => vec![WriteKey::Id(id)],
            None => candidate
                .aliases()
                .iter()
                .map(|alias| WriteKey::Alias(candidate.source().clone(), alias.clone()))
                .collect(),
        }
    }

    fn resolve_previous(&self, candidate: &T) -> Result<Option<T>, StorageError> {
        match candidate.id() {
            Some(id) => self.persistence.resolve_by_id(id),
            None if candidate.aliases().is_empty() => Ok(None),
            None => self.persistence.resolve_by_alias(candidate.source(), candidate.aliases()),
        }
    }

    /// Writes `candidate` unless its content hash equals the stored version's.
    pub fn write(&self, candidate: T) -> EquivResult<WriteResult<T>> {
        let keys = Self::write_keys(&candidate);
        let _guard = self.locks.lock_guard(keys.iter(), &self.lock_options)?;

        let previous = self.resolve_previous(&candidate)?;
        let now = Utc::now();

        let Some(previous) = previous else {
            let mut resource = candidate;
            if resource.id().is_none() {
                resource.set_id(self.ids.generate());
            }
            resource.set_first_seen(now);
            resource.set_last_updated(now);
            self.persistence.persist(&resource, None)?;
            self.announce(&resource, now);
            return Ok(WriteResult {
                resource,
                previous: None,
                written: true,
                write_time: now,
            });
        };

        if previous.content_hash() == candidate.content_hash() {
            tracing::debug!(source = %candidate.source(), id = ?previous.id(), "content unchanged, skipping write");
            return Ok(WriteResult {
                resource: previous.clone(),
                previous: Some(previous),
                written: false,
                write_time: now,
            });
        }

        let id = previous
            .id()
            .ok_or_else(|| EquivError::internal("stored record has no id"))?;
        let mut resource = candidate;
        resource.set_id(id);
        resource.set_first_seen(previous.first_seen().unwrap_or(now));
        resource.set_last_updated(now);
        self.persistence.persist(&resource, Some(&previous))?;
        self.announce(&resource, now);

        Ok(WriteResult {
            resource,
            previous: Some(previous),
            written: true,
            write_time: now,
        })
    }

    fn announce(&self, resource: &T, at: DateTime<Utc>) {
        let (Some(notifier), Some(id)) = (&self.notifier, resource.id()) else {
            return;
        };
        let updated = ResourceRef::new(id, resource.source().clone());
        notifier.enqueue(ResourceUpdatedMessage::new(updated, at));
    }
}
