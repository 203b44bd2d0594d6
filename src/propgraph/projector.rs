use std::sync::Arc;

use crate::notify::{EquivalenceGraphUpdateMessage, GraphChange, MessageSender, SendError};

use super::EquivalenceWriter;

/// Keeps the property graph in step with the graph store.
///
/// Registered as the destination of the store's notifier, it replays each
/// assertion through an [`EquivalenceWriter`]. An update produces one
/// [`GraphChange::Updated`] message plus one message per split-off graph,
/// all carrying the same assertion, so only the former is projected.
#[derive(Debug)]
pub struct GraphUpdateProjector {
    writer: Arc<EquivalenceWriter>,
}

impl GraphUpdateProjector {
    #[must_use]
    pub fn new(writer: Arc<EquivalenceWriter>) -> Self {
        Self { writer }
    }
}

impl MessageSender<EquivalenceGraphUpdateMessage> for GraphUpdateProjector {
    fn send(&self, message: &EquivalenceGraphUpdateMessage) -> Result<(), SendError> {
        if message.change != GraphChange::Updated {
            return Ok(());
        }
        self.writer.write(&message.assertion).map_err(|e| {
            if e.is_retryable() {
                SendError::Unavailable(e.to_string())
            } else {
                SendError::Rejected(e.to_string())
            }
        })
    }
}
