//! Outbound change notification.
//!
//! Writers never talk to a message broker directly. They enqueue onto a
//! [`Notifier`], whose worker thread drains the queue into a
//! [`MessageSender`]. Delivery is at-least-once from the broker's point of
//! view and fire-and-forget from the writer's: a full queue or a failed
//! delivery is counted and logged, never returned to the caller.

/// Message payloads.
pub mod messages;
/// Queue-draining worker.
pub mod worker;

use std::fmt;

use crossbeam_channel::Sender;
use thiserror::Error;
use uuid::Uuid;

pub use messages::{EquivalenceGraphUpdateMessage, GraphChange, ResourceUpdatedMessage};
pub use worker::{Notifier, NotifierStats};

/// A message the notifier can carry.
pub trait Message: fmt::Debug + Send + 'static {
    /// Unique id, used by consumers to de-duplicate redeliveries.
    fn message_id(&self) -> Uuid;

    /// Short type name for logs.
    fn message_type(&self) -> &'static str;

    /// The resource the message is about, rendered for logs.
    fn resource_key(&self) -> String;
}

/// Delivery failure reported by a [`MessageSender`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Message destination is unavailable: {0}")]
    Unavailable(String),

    #[error("Message rejected by destination: {0}")]
    Rejected(String),
}

/// Delivers messages to their destination (a broker topic, an in-process
/// consumer).
pub trait MessageSender<M>: Send + Sync {
    fn send(&self, message: &M) -> Result<(), SendError>;
}

/// Forwards every message into a crossbeam channel.
///
/// Useful for wiring an in-process consumer behind a [`Notifier`].
#[derive(Debug, Clone)]
pub struct ChannelSender<M> {
    tx: Sender<M>,
}

impl<M> ChannelSender<M> {
    #[must_use]
    pub const fn new(tx: Sender<M>) -> Self {
        Self { tx }
    }
}

impl<M: Clone + Send> MessageSender<M> for ChannelSender<M> {
    fn send(&self, message: &M) -> Result<(), SendError> {
        self.tx
            .send(message.clone())
            .map_err(|_| SendError::Unavailable("receiver disconnected".to_string()))
    }
}
