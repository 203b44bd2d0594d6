use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::equivalence::{Deadline, EquivalenceAssertion};
use crate::error::EquivResult;

use super::{EquivalenceEdges, PropertyGraph};

/// Projects equivalence assertions onto a [`PropertyGraph`].
pub struct EquivalenceWriter {
    graph: Arc<dyn PropertyGraph>,
    timeout: Duration,
}

impl fmt::Debug for EquivalenceWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquivalenceWriter").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl EquivalenceWriter {
    #[must_use]
    pub fn new(graph: Arc<dyn PropertyGraph>, timeout: Duration) -> Self {
        Self { graph, timeout }
    }

    /// Writes `subject -IS_EQUIVALENT-> adjacent` for the subject itself and
    /// every asserted adjacent from a considered source, and removes every
    /// other outgoing edge of the subject, so edges to sources that are no
    /// longer considered go away as they do in the graph store.
    pub fn write(&self, assertion: &EquivalenceAssertion) -> EquivResult<()> {
        assertion.validate()?;

        let started = Instant::now();
        let edges = EquivalenceEdges {
            subject: assertion.subject.clone(),
            adjacents: assertion.effective_efferent(),
        };
        self.graph
            .write_equivalences(&edges, Deadline::after(self.timeout))?;

        tracing::debug!(
            subject = %assertion.subject,
            adjacents = edges.adjacents.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "projected equivalence assertion"
        );
        Ok(())
    }
}
