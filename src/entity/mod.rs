//! Stored entities: topics, events and content.
//!
//! Every entity embeds a [`Described`] block carrying the fields the write
//! path needs (id, source, aliases, timestamps) and adds its own payload.
//! Each type hashes explicitly through [`Hashable`](crate::hashing::Hashable).

/// Content items (episodes, brands, films).
pub mod content;
/// Scheduled events.
pub mod event;
/// In-memory entity tables.
pub mod memory;
/// Store facade over the hashed writer.
pub mod store;
/// Topics (people, places, subjects).
pub mod topic;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hashing::{ContentHasher, Hashable};
use crate::id::Id;
use crate::source::Publisher;

pub use content::{Content, ContentKind, ContentStore};
pub use event::{Event, EventStore};
pub use memory::InMemoryEntityTable;
pub use store::EntityStore;
pub use topic::{Topic, TopicKind, TopicStore};

/// Descriptive fields shared by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Described {
    pub id: Option<Id>,
    pub source: Publisher,
    /// Publisher-local keys (URIs, catalogue ids) identifying the record.
    pub aliases: BTreeSet<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Described {
    #[must_use]
    pub fn new(source: impl Into<Publisher>) -> Self {
        Self {
            id: None,
            source: source.into(),
            aliases: BTreeSet::new(),
            title: None,
            description: None,
            first_seen: None,
            last_updated: None,
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Id and timestamps are bookkeeping and stay out of the hash.
impl Hashable for Described {
    fn hash_content(&self, hasher: &mut ContentHasher) {
        hasher
            .str(self.source.key())
            .str_set(&self.aliases)
            .opt_str(self.title.as_deref())
            .opt_str(self.description.as_deref());
    }
}

/// Implements the write-path capability traits for a type embedding a
/// `described: Described` field.
macro_rules! impl_described {
    ($ty:ty) => {
        impl $crate::id::Identified for $ty {
            fn id(&self) -> Option<$crate::id::Id> {
                self.described.id
            }

            fn set_id(&mut self, id: $crate::id::Id) {
                self.described.id = Some(id);
            }
        }

        impl $crate::source::Sourced for $ty {
            fn source(&self) -> &$crate::source::Publisher {
                &self.described.source
            }
        }

        impl $crate::write::WritableEntity for $ty {
            fn aliases(&self) -> &std::collections::BTreeSet<String> {
                &self.described.aliases
            }

            fn first_seen(&self) -> Option<chrono::DateTime<chrono::Utc>> {
                self.described.first_seen
            }

            fn set_first_seen(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.described.first_seen = Some(at);
            }

            fn set_last_updated(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.described.last_updated = Some(at);
            }
        }
    };
}

pub(crate) use impl_described;
