//! In-memory entity tables.
//!
//! Thread-safe [`EntityPersistence`] implementation for embedded use and
//! tests. Records are indexed by id and by `(source, alias)`.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::error::StorageError;
use crate::id::Id;
use crate::source::Publisher;
use crate::write::{EntityPersistence, WritableEntity};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

fn normalize_alias(s: &str) -> String {
    s.trim().to_string()
}

#[derive(Debug)]
struct TableState<T> {
    by_id: HashMap<Id, T>,
    by_alias: HashMap<(Publisher, String), Id>,
}

impl<T> Default for TableState<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_alias: HashMap::new(),
        }
    }
}

/// In-memory table of one entity type.
#[derive(Debug)]
pub struct InMemoryEntityTable<T> {
    state: RwLock<TableState<T>>,
}

impl<T> Default for InMemoryEntityTable<T> {
    fn default() -> Self {
        Self {
            state: RwLock::new(TableState::default()),
        }
    }
}

impl<T: WritableEntity> InMemoryEntityTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().map_err(|_| lock_err("entity table"))?.by_id.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl<T: WritableEntity> EntityPersistence<T> for InMemoryEntityTable<T> {
    fn resolve_by_id(&self, id: Id) -> Result<Option<T>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity table"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn resolve_by_alias(&self, source: &Publisher, aliases: &BTreeSet<String>) -> Result<Option<T>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity table"))?;
        // Aliases iterate in sorted order, so the match is deterministic
        // when a candidate's aliases point at more than one record.
        for alias in aliases {
            let key = (source.clone(), normalize_alias(alias));
            if let Some(id) = state.by_alias.get(&key) {
                return Ok(state.by_id.get(id).cloned());
            }
        }
        Ok(None)
    }

    fn persist(&self, entity: &T, previous: Option<&T>) -> Result<(), StorageError> {
        let id = entity
            .id()
            .ok_or_else(|| StorageError::Rejected("entity has no id".to_string()))?;
        let mut state = self.state.write().map_err(|_| lock_err("entity table"))?;

        if let Some(prev) = previous {
            for alias in prev.aliases() {
                let key = (prev.source().clone(), normalize_alias(alias));
                if state.by_alias.get(&key) == Some(&id) {
                    state.by_alias.remove(&key);
                }
            }
        }
        for alias in entity.aliases() {
            state
                .by_alias
                .insert((entity.source().clone(), normalize_alias(alias)), id);
        }
        state.by_id.insert(id, entity.clone());
        Ok(())
    }
}
