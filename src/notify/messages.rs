use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::equivalence::{EquivalenceAssertion, EquivalenceGraph};
use crate::id::Id;
use crate::resource::ResourceRef;

use super::Message;

/// Emitted after an entity write changed stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdatedMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub updated_resource: ResourceRef,
}

impl ResourceUpdatedMessage {
    #[must_use]
    pub fn new(updated_resource: ResourceRef, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp,
            updated_resource,
        }
    }
}

impl Message for ResourceUpdatedMessage {
    fn message_id(&self) -> Uuid {
        self.message_id
    }

    fn message_type(&self) -> &'static str {
        "resource_updated"
    }

    fn resource_key(&self) -> String {
        self.updated_resource.to_string()
    }
}

/// How a published graph relates to the assertion that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphChange {
    /// The graph now containing the assertion's subject.
    Updated,
    /// A graph split off by the assertion.
    Created,
}

/// Emitted once per graph produced by an equivalence update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceGraphUpdateMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub assertion: EquivalenceAssertion,
    pub change: GraphChange,
    pub graph: EquivalenceGraph,
    /// Graphs merged away by the update. Only set on [`GraphChange::Updated`].
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deleted_graph_ids: BTreeSet<Id>,
}

impl Message for EquivalenceGraphUpdateMessage {
    fn message_id(&self) -> Uuid {
        self.message_id
    }

    fn message_type(&self) -> &'static str {
        match self.change {
            GraphChange::Updated => "equivalence_graph_updated",
            GraphChange::Created => "equivalence_graph_created",
        }
    }

    fn resource_key(&self) -> String {
        format!("graph:{}", self.graph.id())
    }
}
