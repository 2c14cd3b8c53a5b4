//! In-process evaluation of a [`TicketQuery`].

use std::cmp::Ordering;

use super::{SearchPage, SortDirection, SortField, TicketQuery};
use crate::ticket::Ticket;

/// Whether `ticket` satisfies every filter of `query`.
pub fn matches(query: &TicketQuery, ticket: &Ticket) -> bool {
    if let Some(status) = query.status {
        if ticket.status != status {
            return false;
        }
    }
    if let Some(id) = query.dispatcher_id {
        if ticket.dispatcher_id != Some(id) {
            return false;
        }
    }
    if let Some(id) = query.supervisor_id {
        if ticket.supervisor_id != Some(id) {
            return false;
        }
    }
    if let Some(from) = query.scheduled_from {
        if ticket.scheduled_at < from {
            return false;
        }
    }
    if let Some(to) = query.scheduled_to {
        if ticket.scheduled_at > to {
            return false;
        }
    }
    match query.needle() {
        Some(needle) => contains_ci(&ticket.invoice_id, &needle)
            || contains_ci(&ticket.client_name, &needle)
            || contains_ci(&ticket.description, &needle),
        None => true,
    }
}

fn contains_ci(haystack: &str, lowered_needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(lowered_needle)
}

/// Total order used for search results.
pub fn compare(query: &TicketQuery, a: &Ticket, b: &Ticket) -> Ordering {
    let primary = match query.sort {
        SortField::ScheduledAt => a.scheduled_at.cmp(&b.scheduled_at),
        SortField::InvoiceId => a.invoice_id.cmp(&b.invoice_id),
        SortField::ClientName => a.client_name.cmp(&b.client_name),
    };
    let primary = match query.effective_direction() {
        SortDirection::Asc => primary,
        SortDirection::Desc => primary.reverse(),
    };
    primary
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Filter, sort and paginate `candidates`.
pub fn run<'a, I>(query: &TicketQuery, candidates: I) -> SearchPage
where
    I: IntoIterator<Item = &'a Ticket>,
{
    let mut hits: Vec<&Ticket> = candidates
        .into_iter()
        .filter(|ticket| matches(query, ticket))
        .collect();
    hits.sort_by(|a, b| compare(query, a, b));

    let total = hits.len();
    let page = hits
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    SearchPage::new(page, total, query)
}
