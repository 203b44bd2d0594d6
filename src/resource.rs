//! Resource references.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::source::{Publisher, Sourced};

/// One publisher's record of one logical item: an `(id, source)` pair.
///
/// Equality and ordering use both fields. Graph adjacency is keyed by id, so
/// two refs with the same id and different sources describe a data error
/// rather than two resources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: Id,
    pub source: Publisher,
}

impl ResourceRef {
    #[must_use]
    pub fn new(id: impl Into<Id>, source: impl Into<Publisher>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }
}

impl Sourced for ResourceRef {
    fn source(&self) -> &Publisher {
        &self.source
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.source)
    }
}
