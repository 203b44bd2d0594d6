use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::equivalence::Deadline;
use crate::error::EquivResult;
use crate::id::Id;

use super::PropertyGraph;

/// Resolves the equivalent set of a resource with a depth-bounded
/// breadth-first traversal over `IS_EQUIVALENT`, ignoring edge direction.
///
/// A chain longer than the bound is cut off rather than followed.
pub struct BoundedEquivalentSetResolver {
    graph: Arc<dyn PropertyGraph>,
    config: ResolverConfig,
}

impl fmt::Debug for BoundedEquivalentSetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedEquivalentSetResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BoundedEquivalentSetResolver {
    pub fn new(graph: Arc<dyn PropertyGraph>, config: ResolverConfig) -> EquivResult<Self> {
        Ok(Self {
            graph,
            config: config.validate()?,
        })
    }

    /// Ids reachable from `id` within the depth bound, `id` included.
    ///
    /// An id with no node yields an empty set; a node with no edges yields
    /// `{id}`.
    pub fn get_equivalent_set(&self, id: Id) -> EquivResult<BTreeSet<Id>> {
        let deadline = Deadline::after(self.config.timeout());
        let set = self.graph.equivalent_set(id, self.config.max_depth, deadline)?;
        tracing::trace!(%id, members = set.len(), "resolved equivalent set");
        Ok(set)
    }
}
