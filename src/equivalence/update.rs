use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::Id;
use crate::resource::ResourceRef;
use crate::source::SourceSet;

use super::graph::EquivalenceGraph;

/// One upstream claim: `subject` is equivalent to exactly
/// `asserted_adjacents` among `considered_sources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceAssertion {
    pub subject: ResourceRef,
    pub asserted_adjacents: BTreeSet<ResourceRef>,
    pub considered_sources: SourceSet,
}

impl EquivalenceAssertion {
    #[must_use]
    pub fn new(subject: ResourceRef, asserted_adjacents: BTreeSet<ResourceRef>, considered_sources: SourceSet) -> Self {
        Self {
            subject,
            asserted_adjacents,
            considered_sources,
        }
    }

    /// Rejects an assertion whose subject is outside the considered sources.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.considered_sources.contains(&self.subject.source) {
            return Err(ValidationError::SubjectSourceNotConsidered {
                subject: self.subject.id,
                publisher: self.subject.source.to_string(),
            });
        }
        Ok(())
    }

    /// The subject's new efferent set: itself plus every asserted adjacent
    /// from a considered source.
    #[must_use]
    pub fn effective_efferent(&self) -> BTreeSet<ResourceRef> {
        self.asserted_adjacents
            .iter()
            .filter(|r| self.considered_sources.contains(&r.source))
            .cloned()
            .chain(std::iter::once(self.subject.clone()))
            .collect()
    }

    /// Subject id plus every asserted adjacent id.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<Id> {
        self.asserted_adjacents
            .iter()
            .map(|r| r.id)
            .chain(std::iter::once(self.subject.id))
            .collect()
    }
}

/// Result of an assertion that changed stored graphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceGraphUpdate {
    /// The graph now containing the subject.
    pub updated: EquivalenceGraph,
    /// Graphs split off from the subject's previous graph.
    pub created: Vec<EquivalenceGraph>,
    /// Ids of graphs that no longer exist, merged into `updated` or
    /// superseded by a split.
    pub deleted: BTreeSet<Id>,
    pub assertion: EquivalenceAssertion,
}
