use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hashing::{ContentHasher, Hashable};
use crate::id::Id;

use super::{impl_described, Described, EntityStore};

/// Something happening at a time and place, e.g. a football match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub described: Described,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    /// Topics the event is about.
    pub topics: BTreeSet<Id>,
}

impl Event {
    #[must_use]
    pub fn new(described: Described) -> Self {
        Self {
            described,
            start_time: None,
            end_time: None,
            venue: None,
            topics: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }
}

impl Hashable for Event {
    fn hash_content(&self, hasher: &mut ContentHasher) {
        hasher
            .nested(&self.described)
            .opt_timestamp(self.start_time)
            .opt_timestamp(self.end_time)
            .opt_str(self.venue.as_deref())
            .u64(self.topics.len() as u64);
        for topic in &self.topics {
            hasher.u64(topic.as_u64());
        }
    }
}

impl_described!(Event);

pub type EventStore = EntityStore<Event>;
