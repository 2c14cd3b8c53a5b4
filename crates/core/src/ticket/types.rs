//! Core ticket data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TicketError;

/// Lifecycle status of a dispatch ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Pending,
        TicketStatus::InProgress,
        TicketStatus::Completed,
        TicketStatus::Cancelled,
    ];

    /// Returns the status as stored and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Completed => "completed",
            TicketStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TicketError::Validation(format!("invalid status: {}", s)))
    }
}

/// A dispatch ticket ("despacho").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    /// External invoice number, unique across all tickets.
    pub invoice_id: String,
    pub client_name: String,
    pub scheduled_at: DateTime<Utc>,
    /// Entry note; while pending, what remains to be delivered.
    pub description: String,
    pub status: TicketStatus,
    pub dispatcher_id: Option<i64>,
    /// Username cached when `dispatcher_id` was written.
    pub dispatcher_name: Option<String>,
    pub supervisor_id: Option<i64>,
    /// Username cached when `supervisor_id` was written.
    pub supervisor_name: Option<String>,
    pub notes: Option<String>,
    /// Present exactly when the ticket is cancelled.
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated ticket ready to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    pub invoice_id: String,
    pub client_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub description: String,
    pub status: TicketStatus,
    pub dispatcher_id: Option<i64>,
    pub dispatcher_name: Option<String>,
    pub supervisor_id: Option<i64>,
    pub supervisor_name: Option<String>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewTicket {
    pub(crate) fn into_ticket(self, id: i64) -> Ticket {
        Ticket {
            id,
            invoice_id: self.invoice_id,
            client_name: self.client_name,
            scheduled_at: self.scheduled_at,
            description: self.description,
            status: self.status,
            dispatcher_id: self.dispatcher_id,
            dispatcher_name: self.dispatcher_name,
            supervisor_id: self.supervisor_id,
            supervisor_name: self.supervisor_name,
            notes: self.notes,
            cancellation_reason: self.cancellation_reason,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Check the cancellation invariant: a reason is stored iff the ticket is cancelled.
pub(crate) fn check_cancellation(
    status: TicketStatus,
    reason: Option<&str>,
) -> Result<(), TicketError> {
    let has_reason = reason.is_some_and(|r| !r.trim().is_empty());
    match (status, has_reason) {
        (TicketStatus::Cancelled, false) => Err(TicketError::Validation(
            "cancellationReason is required when cancelling".to_string(),
        )),
        (TicketStatus::Cancelled, true) | (_, false) => Ok(()),
        (_, true) => Err(TicketError::Validation(format!(
            "cancellationReason is only allowed on cancelled tickets, status is {}",
            status
        ))),
    }
}

/// Number of tickets per status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.completed + self.cancelled
    }

    pub fn get(&self, status: TicketStatus) -> u64 {
        match status {
            TicketStatus::Pending => self.pending,
            TicketStatus::InProgress => self.in_progress,
            TicketStatus::Completed => self.completed,
            TicketStatus::Cancelled => self.cancelled,
        }
    }

    pub(crate) fn add(&mut self, status: TicketStatus, n: u64) {
        match status {
            TicketStatus::Pending => self.pending += n,
            TicketStatus::InProgress => self.in_progress += n,
            TicketStatus::Completed => self.completed += n,
            TicketStatus::Cancelled => self.cancelled += n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in TicketStatus::ALL {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_status_rejects_unknown() {
        assert!(matches!(
            "shipped".parse::<TicketStatus>(),
            Err(TicketError::Validation(_))
        ));
        assert!("Pending".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_check_cancellation() {
        assert!(check_cancellation(TicketStatus::Cancelled, Some("client refused")).is_ok());
        assert!(check_cancellation(TicketStatus::Cancelled, None).is_err());
        assert!(check_cancellation(TicketStatus::Cancelled, Some("   ")).is_err());
        assert!(check_cancellation(TicketStatus::Pending, None).is_ok());
        assert!(check_cancellation(TicketStatus::Completed, Some("late")).is_err());
    }

    #[test]
    fn test_ticket_serializes_camel_case() {
        let now = Utc::now();
        let ticket = Ticket {
            id: 7,
            invoice_id: "F-7".to_string(),
            client_name: "Acme".to_string(),
            scheduled_at: now,
            description: String::new(),
            status: TicketStatus::InProgress,
            dispatcher_id: None,
            dispatcher_name: None,
            supervisor_id: Some(1),
            supervisor_name: Some("supervisor".to_string()),
            notes: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["invoiceId"], "F-7");
        assert_eq!(json["clientName"], "Acme");
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["supervisorName"], "supervisor");
        assert!(json["cancellationReason"].is_null());
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(TicketStatus::Pending, 2);
        counts.add(TicketStatus::Cancelled, 1);
        assert_eq!(counts.get(TicketStatus::Pending), 2);
        assert_eq!(counts.total(), 3);
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["inProgress"], 0);
    }
}
