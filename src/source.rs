//! Source and provenance types.
//!
//! Every resource is published by exactly one source. Equivalence edges are
//! only honoured between sources a caller has chosen to consider, so the
//! source is part of a resource's identity.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The publisher (broadcaster, catalogue provider) that supplied a record.
///
/// Publishers are identified by a stable key such as `"bbc.co.uk"`.
///
/// # Examples
///
/// ```
/// use equivgraph::Publisher;
///
/// let bbc = Publisher::new("bbc.co.uk");
/// assert_eq!(bbc.key(), "bbc.co.uk");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Publisher(String);

impl Publisher {
    /// Creates a publisher from its key. Surrounding whitespace is trimmed.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.len() == key.len() {
            Self(key)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Returns the publisher key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Publisher {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Set of sources a caller considers when asserting equivalence.
pub type SourceSet = BTreeSet<Publisher>;

/// Capability: something published by a single source.
pub trait Sourced {
    /// Returns the publishing source.
    fn source(&self) -> &Publisher;
}

/// Builds a [`SourceSet`] from publisher keys.
///
/// # Examples
///
/// ```
/// use equivgraph::source::sources;
///
/// let set = sources(["pa", "bbc.co.uk"]);
/// assert_eq!(set.len(), 2);
/// ```
pub fn sources<I, S>(keys: I) -> SourceSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    keys.into_iter().map(Publisher::new).collect()
}
