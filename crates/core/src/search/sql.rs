//! Translation of a [`TicketQuery`] into parameterized SQLite clauses.
//!
//! User input only ever reaches the statement as a bound parameter.

use rusqlite::ToSql;

use super::{SortDirection, SortField, TicketQuery};
use crate::schedule::to_storage_string;

/// Build the `WHERE` clause and its parameters. Returns an empty clause when
/// the query has no filters.
pub fn build_where_clause(query: &TicketQuery) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions: Vec<&'static str> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = query.status {
        conditions.push("status = ?");
        params.push(Box::new(status.as_str()));
    }

    if let Some(id) = query.dispatcher_id {
        conditions.push("dispatcher_id = ?");
        params.push(Box::new(id));
    }

    if let Some(id) = query.supervisor_id {
        conditions.push("supervisor_id = ?");
        params.push(Box::new(id));
    }

    // Timestamps are fixed-width UTC strings, so text comparison is chronological.
    if let Some(from) = query.scheduled_from {
        conditions.push("scheduled_at >= ?");
        params.push(Box::new(to_storage_string(&from)));
    }

    if let Some(to) = query.scheduled_to {
        conditions.push("scheduled_at <= ?");
        params.push(Box::new(to_storage_string(&to)));
    }

    if let Some(needle) = query.needle() {
        conditions.push(
            "(instr(lower(invoice_id), ?) > 0 OR instr(lower(client_name), ?) > 0 OR instr(lower(description), ?) > 0)",
        );
        for _ in 0..3 {
            params.push(Box::new(needle.clone()));
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, params)
}

/// Build the `ORDER BY` clause. Column names come from a fixed whitelist.
pub fn order_by_clause(query: &TicketQuery) -> String {
    let column = match query.sort {
        SortField::ScheduledAt => "scheduled_at",
        SortField::InvoiceId => "invoice_id",
        SortField::ClientName => "client_name",
    };
    let direction = match query.effective_direction() {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    format!("ORDER BY {} {}, created_at DESC, id DESC", column, direction)
}

/// Build `LIMIT ? OFFSET ?` parameters. SQLite treats a negative limit as unbounded.
pub fn page_params(query: &TicketQuery) -> (i64, i64) {
    let limit = query
        .limit
        .and_then(|limit| i64::try_from(limit).ok())
        .unwrap_or(-1);
    let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);
    (limit, offset)
}
