use serde::{Deserialize, Serialize};

use crate::hashing::{ContentHasher, Hashable};

use super::{impl_described, Described, EntityStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    Subject,
    Person,
    Place,
    Product,
    #[default]
    Unknown,
}

impl TopicKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Person => "person",
            Self::Place => "place",
            Self::Product => "product",
            Self::Unknown => "unknown",
        }
    }
}

/// A thing content can be about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub described: Described,
    pub kind: TopicKind,
    /// External vocabulary the topic comes from (e.g. `"dbpedia"`).
    pub namespace: Option<String>,
    /// Identifier within `namespace`.
    pub value: Option<String>,
}

impl Topic {
    #[must_use]
    pub fn new(described: Described, kind: TopicKind) -> Self {
        Self {
            described,
            kind,
            namespace: None,
            value: None,
        }
    }

    #[must_use]
    pub fn with_external_id(mut self, namespace: impl Into<String>, value: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.value = Some(value.into());
        self
    }
}

impl Hashable for Topic {
    fn hash_content(&self, hasher: &mut ContentHasher) {
        hasher
            .nested(&self.described)
            .str(self.kind.as_str())
            .opt_str(self.namespace.as_deref())
            .opt_str(self.value.as_deref());
    }
}

impl_described!(Topic);

pub type TopicStore = EntityStore<Topic>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_is_part_of_content() {
        let base = Topic::new(Described::new("dbpedia").with_title("London"), TopicKind::Place);
        let linked = base.clone().with_external_id("dbpedia", "London");
        assert_ne!(base.content_hash(), linked.content_hash());
    }
}
