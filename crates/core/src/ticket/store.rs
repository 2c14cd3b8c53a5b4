//! Ticket storage trait and error type.

use thiserror::Error;

use super::{NewTicket, StatusCounts, Ticket};
use crate::search::TicketSearch;

/// Error type for ticket operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    /// Missing or invalid field.
    #[error("{0}")]
    Validation(String),

    /// Another ticket already uses this invoice id.
    #[error("A ticket with invoice id {0} already exists")]
    DuplicateInvoice(String),

    #[error("Ticket not found: {0}")]
    NotFound(i64),

    /// Underlying persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Trait for ticket storage backends.
///
/// Implementations enforce invoice uniqueness, the status set and the
/// cancellation invariant themselves, independently of callers.
pub trait TicketStore: TicketSearch + Send + Sync {
    /// Get a ticket by id.
    fn get(&self, id: i64) -> Result<Option<Ticket>, TicketError>;

    /// All tickets, newest schedule first, ties by newest creation.
    fn list_all(&self) -> Result<Vec<Ticket>, TicketError>;

    /// Insert a new ticket and return it with its assigned id.
    fn insert(&self, ticket: NewTicket) -> Result<Ticket, TicketError>;

    /// Overwrite every mutable column of an existing ticket.
    fn update(&self, ticket: &Ticket) -> Result<Ticket, TicketError>;

    /// Permanently delete a ticket, returning what was removed.
    fn delete(&self, id: i64) -> Result<Ticket, TicketError>;

    /// Ticket count for every status.
    fn count_by_status(&self) -> Result<StatusCounts, TicketError>;
}
