//! Ticket API handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Deserializer, Serialize};

use despacho_core::{
    parse_date, CreateTicketRequest, ScheduleZone, SortDirection, SortField, StatusCounts,
    StatusPayload, Ticket, TicketPatch, TicketQuery, TicketStatus,
};

use super::response::{ApiError, ApiJson, ApiPath, ApiQuery, ApiResponse};
use crate::state::AppState;

/// Maximum allowed page size for ticket searches
const MAX_LIMIT: usize = 1000;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Search filters, shared by `GET /tickets/search` and the `tickets:request`
/// socket message. Blank values are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub q: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub dispatcher_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub supervisor_id: Option<String>,
    /// Calendar date, `YYYY-MM-DD`.
    pub date_from: Option<String>,
    /// Calendar date, `YYYY-MM-DD`.
    pub date_to: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub offset: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub sort_direction: Option<String>,
}

impl SearchParams {
    /// Validate the filters and build a query. Dates are whole days in `zone`.
    pub fn into_query(self, zone: &ScheduleZone) -> Result<TicketQuery, ApiError> {
        let mut query = TicketQuery::new();

        if let Some(q) = present(&self.q) {
            query = query.with_text(q);
        }
        if let Some(status) = present(&self.status) {
            query = query.with_status(TicketStatus::from_str(status)?);
        }
        if let Some(id) = parse_field::<i64>(&self.dispatcher_id, "dispatcherId")? {
            query = query.with_dispatcher(id);
        }
        if let Some(id) = parse_field::<i64>(&self.supervisor_id, "supervisorId")? {
            query = query.with_supervisor(id);
        }

        let from = present(&self.date_from).map(parse_date).transpose();
        let to = present(&self.date_to).map(parse_date).transpose();
        let (from, to) = match (from, to) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(e), _) | (_, Err(e)) => return Err(ApiError::BadRequest(e.to_string())),
        };
        if from.is_some() || to.is_some() {
            query = query.with_dates(from, to, zone);
        }

        if let Some(offset) = parse_field::<usize>(&self.offset, "offset")? {
            query = query.with_offset(offset);
        }
        if let Some(limit) = parse_field::<usize>(&self.limit, "limit")? {
            query = query.with_limit(limit.clamp(1, MAX_LIMIT));
        }

        let sort = match present(&self.sort_by) {
            None | Some("scheduledAt") => SortField::ScheduledAt,
            Some("invoiceId") => SortField::InvoiceId,
            Some("clientName") => SortField::ClientName,
            Some(other) => {
                return Err(ApiError::BadRequest(format!("invalid sortBy: {}", other)));
            }
        };
        let direction = match present(&self.sort_direction).map(str::to_ascii_lowercase) {
            None => None,
            Some(dir) if dir == "asc" => Some(SortDirection::Asc),
            Some(dir) if dir == "desc" => Some(SortDirection::Desc),
            Some(other) => {
                return Err(ApiError::BadRequest(format!(
                    "invalid sortDirection: {}",
                    other
                )));
            }
        };

        Ok(query.sorted_by(sort, direction))
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_field<T: FromStr>(value: &Option<String>, name: &str) -> Result<Option<T>, ApiError> {
    present(value)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", name, raw)))
        })
        .transpose()
}

/// Query strings carry numbers as text, socket messages as JSON numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Int(n) => n.to_string(),
        Raw::Uint(n) => n.to_string(),
    }))
}

/// Search response: the envelope plus pagination details.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub data: Vec<Ticket>,
    pub count: usize,
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
    pub has_more: bool,
}

/// Ticket counts per status plus their sum.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketStats {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub total: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// List every ticket in default order
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Vec<Ticket>>, ApiError> {
    let tickets = state.lifecycle().list_all()?;
    let count = tickets.len();
    Ok(ApiResponse::ok(tickets).with_count(count))
}

/// Filtered, paginated search
pub async fn search_tickets(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> Result<axum::Json<SearchResponse>, ApiError> {
    let query = params.into_query(state.lifecycle().zone())?;
    let page = state.lifecycle().search(&query)?;

    Ok(axum::Json(SearchResponse {
        success: true,
        count: page.tickets.len(),
        data: page.tickets,
        total: page.total,
        offset: page.offset,
        limit: page.limit,
        has_more: page.has_more,
    }))
}

/// Ticket counts per status
pub async fn ticket_stats(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<TicketStats>, ApiError> {
    let counts = state.lifecycle().status_counts()?;
    Ok(ApiResponse::ok(TicketStats {
        total: counts.total(),
        counts,
    }))
}

/// Tickets in one status, default order
pub async fn tickets_by_status(
    State(state): State<Arc<AppState>>,
    ApiPath(status): ApiPath<String>,
) -> Result<ApiResponse<Vec<Ticket>>, ApiError> {
    let status = TicketStatus::from_str(&status)?;
    let page = state
        .lifecycle()
        .search(&TicketQuery::all().with_status(status))?;
    let count = page.tickets.len();
    Ok(ApiResponse::ok(page.tickets).with_count(count))
}

/// Tickets assigned to one dispatcher, default order
pub async fn tickets_by_dispatcher(
    State(state): State<Arc<AppState>>,
    ApiPath(dispatcher_id): ApiPath<i64>,
) -> Result<ApiResponse<Vec<Ticket>>, ApiError> {
    let page = state
        .lifecycle()
        .search(&TicketQuery::all().with_dispatcher(dispatcher_id))?;
    let count = page.tickets.len();
    Ok(ApiResponse::ok(page.tickets).with_count(count))
}

/// Get a ticket by id
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<Ticket>, ApiError> {
    Ok(ApiResponse::ok(state.lifecycle().get(id)?))
}

/// Create a new ticket
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<CreateTicketRequest>,
) -> Result<(StatusCode, ApiResponse<Ticket>), ApiError> {
    let ticket = state.lifecycle().create(body)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(ticket).with_message("Ticket created"),
    ))
}

/// Partially update a ticket
pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<TicketPatch>,
) -> Result<ApiResponse<Ticket>, ApiError> {
    let ticket = state.lifecycle().update(id, patch)?;
    Ok(ApiResponse::ok(ticket).with_message("Ticket updated"))
}

/// Change a ticket's status
pub async fn set_ticket_status(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<StatusPayload>,
) -> Result<ApiResponse<Ticket>, ApiError> {
    let ticket = state.lifecycle().set_status(id, payload)?;
    Ok(ApiResponse::ok(ticket).with_message("Ticket status updated"))
}

/// Permanently delete a ticket
pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<()>, ApiError> {
    state.lifecycle().delete(id)?;
    Ok(ApiResponse::message("Ticket deleted"))
}
