//! Ticket change events and their fan-out to connected sessions.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::ticket::Ticket;

/// A committed change to the ticket set.
///
/// Serialized as `{"event": "ticket:updated", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum TicketEvent {
    #[serde(rename = "ticket:created")]
    Created(Ticket),
    #[serde(rename = "ticket:updated")]
    Updated(Ticket),
    #[serde(rename = "ticket:deleted")]
    Deleted { id: i64 },
}

impl TicketEvent {
    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            TicketEvent::Created(_) => "ticket:created",
            TicketEvent::Updated(_) => "ticket:updated",
            TicketEvent::Deleted { .. } => "ticket:deleted",
        }
    }

    pub fn ticket_id(&self) -> i64 {
        match self {
            TicketEvent::Created(ticket) | TicketEvent::Updated(ticket) => ticket.id,
            TicketEvent::Deleted { id } => *id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Event channel closed")]
    Closed,

    #[error("Failed to publish event: {0}")]
    Failed(String),
}

/// Fan-out sink for ticket events.
pub trait EventPublisher: Send + Sync {
    /// Publish an event to every current subscriber, returning how many
    /// subscribers it reached.
    fn publish(&self, event: TicketEvent) -> Result<usize, BroadcastError>;
}

/// Broadcaster for ticket events using a tokio broadcast channel.
///
/// Each subscriber observes events in publish order. A subscriber that falls
/// more than `capacity` events behind loses the oldest ones.
#[derive(Debug, Clone)]
pub struct TicketBroadcaster {
    sender: broadcast::Sender<TicketEvent>,
}

impl TicketBroadcaster {
    /// Create a new broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TicketBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventPublisher for TicketBroadcaster {
    fn publish(&self, event: TicketEvent) -> Result<usize, BroadcastError> {
        // No subscribers is not a failure, nobody needed the event.
        Ok(self.sender.send(event).unwrap_or(0))
    }
}
