use std::fmt;
use std::sync::Arc;

use crate::error::{EquivResult, StorageError};
use crate::id::{Id, IdGenerator};
use crate::lock::KeyedMultiLock;
use crate::notify::{Notifier, ResourceUpdatedMessage};
use crate::write::{EntityPersistence, HashedWriter, WritableEntity, WriteKey, WriteResult};

/// Read/write facade for one entity type.
///
/// Writes go through [`HashedWriter`], so re-ingesting an unchanged record
/// is a cheap no-op that emits nothing.
pub struct EntityStore<T> {
    persistence: Arc<dyn EntityPersistence<T>>,
    writer: HashedWriter<T>,
}

impl<T> fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore").field("writer", &self.writer).finish_non_exhaustive()
    }
}

impl<T: WritableEntity> EntityStore<T> {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn EntityPersistence<T>>,
        ids: Arc<dyn IdGenerator>,
        notifier: Option<Arc<Notifier<ResourceUpdatedMessage>>>,
        locks: Arc<KeyedMultiLock<WriteKey>>,
    ) -> Self {
        let writer = HashedWriter::new(Arc::clone(&persistence), ids, notifier, locks);
        Self { persistence, writer }
    }

    pub fn write(&self, candidate: T) -> EquivResult<WriteResult<T>> {
        self.writer.write(candidate)
    }

    pub fn resolve(&self, id: Id) -> Result<Option<T>, StorageError> {
        self.persistence.resolve_by_id(id)
    }

    /// Resolves many ids; unknown ids are absent from the result.
    pub fn resolve_all<I>(&self, ids: I) -> Result<Vec<T>, StorageError>
    where
        I: IntoIterator<Item = Id>,
    {
        let mut out = Vec::new();
        for id in ids {
            if let Some(found) = self.persistence.resolve_by_id(id)? {
                out.push(found);
            }
        }
        Ok(out)
    }
}
