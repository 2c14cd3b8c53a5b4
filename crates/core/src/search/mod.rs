//! Filtered, sorted and paginated ticket search.
//!
//! A [`TicketQuery`] is backend-neutral. The SQLite store turns it into
//! parameterized predicates ([`sql`]), the in-memory mirror evaluates it
//! directly ([`matcher`]). Both follow the same rules:
//!
//! - free text is an ASCII case-insensitive substring match against the
//!   invoice id, client name or description;
//! - date bounds are inclusive instants on `scheduled_at`;
//! - results are ordered by the sort field, then newest `created_at`, then
//!   highest id.

pub mod matcher;
pub mod sql;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::{clamp_to_storable, ScheduleZone};
use crate::ticket::{Ticket, TicketError, TicketStatus};

/// Default page size.
pub const DEFAULT_LIMIT: usize = 10;

/// Field used as the primary sort key.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    ScheduledAt,
    InvoiceId,
    ClientName,
}

impl SortField {
    /// Dates list newest first, names alphabetically.
    pub fn default_direction(&self) -> SortDirection {
        match self {
            SortField::ScheduledAt => SortDirection::Desc,
            SortField::InvoiceId | SortField::ClientName => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Filter specification for ticket search. All filters combine with AND.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketQuery {
    pub text: Option<String>,
    pub status: Option<TicketStatus>,
    pub dispatcher_id: Option<i64>,
    pub supervisor_id: Option<i64>,
    /// Inclusive lower bound on `scheduled_at`.
    pub scheduled_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `scheduled_at`.
    pub scheduled_to: Option<DateTime<Utc>>,
    pub offset: usize,
    /// `None` returns every match.
    pub limit: Option<usize>,
    pub sort: SortField,
    /// `None` uses the sort field's default direction.
    pub direction: Option<SortDirection>,
}

impl Default for TicketQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketQuery {
    /// Create a query with default pagination and ordering.
    pub fn new() -> Self {
        Self {
            text: None,
            status: None,
            dispatcher_id: None,
            supervisor_id: None,
            scheduled_from: None,
            scheduled_to: None,
            offset: 0,
            limit: Some(DEFAULT_LIMIT),
            sort: SortField::default(),
            direction: None,
        }
    }

    /// A query without pagination, in default order.
    pub fn all() -> Self {
        Self::new().unbounded()
    }

    /// Free text search. Blank text is ignored.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        self.text = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher_id: i64) -> Self {
        self.dispatcher_id = Some(dispatcher_id);
        self
    }

    pub fn with_supervisor(mut self, supervisor_id: i64) -> Self {
        self.supervisor_id = Some(supervisor_id);
        self
    }

    /// Restrict to whole calendar days in `zone`, both ends inclusive.
    pub fn with_dates(
        mut self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        zone: &ScheduleZone,
    ) -> Self {
        self.scheduled_from = from.map(|date| clamp_to_storable(zone.start_of_day(date)));
        self.scheduled_to = to.map(|date| clamp_to_storable(zone.end_of_day(date)));
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.limit = None;
        self
    }

    pub fn sorted_by(mut self, sort: SortField, direction: Option<SortDirection>) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }

    /// Direction actually applied.
    pub fn effective_direction(&self) -> SortDirection {
        self.direction
            .unwrap_or_else(|| self.sort.default_direction())
    }

    /// Lowercased search needle, if any.
    pub(crate) fn needle(&self) -> Option<String> {
        self.text.as_ref().map(|t| t.to_ascii_lowercase())
    }

    /// True when status is the only active filter.
    pub(crate) fn status_only(&self) -> bool {
        self.status.is_some()
            && self.text.is_none()
            && self.dispatcher_id.is_none()
            && self.supervisor_id.is_none()
            && self.scheduled_from.is_none()
            && self.scheduled_to.is_none()
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub tickets: Vec<Ticket>,
    /// Number of tickets matching the filters, ignoring pagination.
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
    pub has_more: bool,
}

impl SearchPage {
    pub fn new(tickets: Vec<Ticket>, total: usize, query: &TicketQuery) -> Self {
        let has_more = query
            .limit
            .is_some_and(|limit| query.offset.saturating_add(limit) < total);
        Self {
            tickets,
            total,
            offset: query.offset,
            limit: query.limit,
            has_more,
        }
    }
}

/// Capability shared by every ticket backend. Search never mutates data.
pub trait TicketSearch: Send + Sync {
    fn search(&self, query: &TicketQuery) -> Result<SearchPage, TicketError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let query = TicketQuery::new();
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, 0);
        assert_eq!(query.sort, SortField::ScheduledAt);
        assert_eq!(query.effective_direction(), SortDirection::Desc);
    }

    #[test]
    fn test_blank_text_ignored() {
        assert!(TicketQuery::new().with_text("   ").text.is_none());
        assert_eq!(
            TicketQuery::new().with_text("  F-1 ").text.as_deref(),
            Some("F-1")
        );
    }

    #[test]
    fn test_name_sort_defaults_ascending() {
        let query = TicketQuery::new().sorted_by(SortField::ClientName, None);
        assert_eq!(query.effective_direction(), SortDirection::Asc);
        let query = query.sorted_by(SortField::ClientName, Some(SortDirection::Desc));
        assert_eq!(query.effective_direction(), SortDirection::Desc);
    }

    #[test]
    fn test_has_more() {
        let query = TicketQuery::new().with_limit(10).with_offset(10);
        assert!(SearchPage::new(vec![], 25, &query).has_more);

        let query = TicketQuery::new().with_limit(10).with_offset(20);
        assert!(!SearchPage::new(vec![], 25, &query).has_more);

        assert!(!SearchPage::new(vec![], 25, &TicketQuery::all()).has_more);
    }

    #[test]
    fn test_sort_field_serde() {
        let field: SortField = serde_json::from_str("\"invoiceId\"").unwrap();
        assert_eq!(field, SortField::InvoiceId);
        let dir: SortDirection = serde_json::from_str("\"asc\"").unwrap();
        assert_eq!(dir, SortDirection::Asc);
    }
}
