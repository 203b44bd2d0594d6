use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::hashing::{ContentHasher, Hashable};
use crate::id::Id;

use super::{impl_described, Described, EntityStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Brand,
    Series,
    Episode,
    Film,
    Clip,
    Item,
}

impl ContentKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Brand => "brand",
            Self::Series => "series",
            Self::Episode => "episode",
            Self::Film => "film",
            Self::Clip => "clip",
            Self::Item => "item",
        }
    }
}

/// A piece of published content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub described: Described,
    pub kind: ContentKind,
    /// Parent brand or series.
    pub container: Option<Id>,
    pub genres: BTreeSet<String>,
    pub duration_secs: Option<u64>,
}

impl Content {
    #[must_use]
    pub fn new(described: Described, kind: ContentKind) -> Self {
        Self {
            described,
            kind,
            container: None,
            genres: BTreeSet::new(),
            duration_secs: None,
        }
    }
}

impl Hashable for Content {
    fn hash_content(&self, hasher: &mut ContentHasher) {
        hasher.nested(&self.described).str(self.kind.as_str());
        match self.container {
            Some(id) => hasher.bool(true).u64(id.as_u64()),
            None => hasher.bool(false),
        };
        hasher.str_set(&self.genres);
        match self.duration_secs {
            Some(secs) => hasher.bool(true).u64(secs),
            None => hasher.bool(false),
        };
    }
}

impl_described!(Content);

pub type ContentStore = EntityStore<Content>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_part_of_content() {
        let d = Described::new("bbc.co.uk").with_title("Sherlock");
        assert_ne!(
            Content::new(d.clone(), ContentKind::Brand).content_hash(),
            Content::new(d, ContentKind::Episode).content_hash()
        );
    }

    #[test]
    fn absent_and_zero_duration_differ() {
        let d = Described::new("pa");
        let mut a = Content::new(d.clone(), ContentKind::Film);
        let mut b = Content::new(d, ContentKind::Film);
        a.duration_secs = None;
        b.duration_secs = Some(0);
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
