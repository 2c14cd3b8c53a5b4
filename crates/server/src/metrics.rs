//! Prometheus metrics for observability.
//!
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Ticket events and status transitions
//! - Tickets by status (collected on scrape)

use std::sync::Arc;

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use despacho_core::{
    LifecycleManager, MemoryTicketStore, TicketBroadcaster, TicketEvent, TicketStatus, TicketStore,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "despachos_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .expect("valid metric definition")
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("despachos_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("valid metric definition")
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "despachos_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .expect("valid metric definition")
});

/// Login failures by reason.
pub static LOGIN_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("despachos_login_failures_total", "Total failed logins"),
        &["reason"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "despachos_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .expect("valid metric definition")
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "despachos_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .expect("valid metric definition")
});

/// WebSocket messages sent by event name.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("despachos_ws_messages_sent_total", "WebSocket messages sent"),
        &["event"],
    )
    .expect("valid metric definition")
});

/// WebSocket lag events (when a session falls behind the broadcast).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "despachos_ws_lag_events_total",
        "WebSocket lag events (session fell behind)",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Ticket Metrics
// =============================================================================

/// Tickets by current status (collected on scrape).
pub static TICKETS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("despachos_tickets_by_status", "Current ticket count by status"),
        &["status"],
    )
    .expect("valid metric definition")
});

/// Ticket status transitions.
pub static TICKET_STATUS_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "despachos_ticket_status_transitions_total",
            "Ticket status transitions",
        ),
        &["from", "to"],
    )
    .expect("valid metric definition")
});

/// Tickets created total.
pub static TICKETS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "despachos_tickets_created_total",
        "Total tickets created since startup",
    )
    .expect("valid metric definition")
});

/// Tickets deleted total.
pub static TICKETS_DELETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "despachos_tickets_deleted_total",
        "Total tickets deleted since startup",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // HTTP
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        Box::new(LOGIN_FAILURES_TOTAL.clone()),
        // WebSocket
        Box::new(WS_CONNECTIONS_ACTIVE.clone()),
        Box::new(WS_CONNECTIONS_TOTAL.clone()),
        Box::new(WS_MESSAGES_SENT.clone()),
        Box::new(WS_LAG_EVENTS.clone()),
        // Tickets
        Box::new(TICKETS_BY_STATUS.clone()),
        Box::new(TICKET_STATUS_TRANSITIONS.clone()),
        Box::new(TICKETS_CREATED_TOTAL.clone()),
        Box::new(TICKETS_DELETED_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Refresh gauges derived from current state. Called before encoding.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    match state.lifecycle().status_counts() {
        Ok(counts) => {
            for status in TicketStatus::ALL {
                TICKETS_BY_STATUS
                    .with_label_values(&[status.as_str()])
                    .set(counts.get(status) as i64);
            }
        }
        Err(e) => warn!("Failed to count tickets for metrics: {}", e),
    }
}

/// Follow the ticket event stream and count creations, deletions and
/// status transitions.
///
/// Keeps an in-memory replica of the tickets so an update event can be
/// compared with the previous status.
pub fn spawn_event_metrics(
    lifecycle: Arc<LifecycleManager>,
    broadcaster: &TicketBroadcaster,
) -> JoinHandle<()> {
    // Subscribe before the snapshot so no event falls in between.
    let mut rx = broadcaster.subscribe();
    let replica = MemoryTicketStore::new();
    reload(&replica, &lifecycle);

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    record_event(&replica, &event);
                    if let Err(e) = replica.apply_event(&event) {
                        warn!("Metrics replica rejected event: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Metrics task lagged, skipped {} events, reloading", n);
                    reload(&replica, &lifecycle);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Broadcast channel closed, stopping event metrics");
                    break;
                }
            }
        }
    })
}

fn reload(replica: &MemoryTicketStore, lifecycle: &LifecycleManager) {
    let result = lifecycle
        .list_all()
        .and_then(|tickets| replica.load_snapshot(tickets));
    if let Err(e) = result {
        warn!("Failed to load tickets for metrics: {}", e);
    }
}

fn record_event(replica: &MemoryTicketStore, event: &TicketEvent) {
    match event {
        TicketEvent::Created(_) => TICKETS_CREATED_TOTAL.inc(),
        TicketEvent::Updated(ticket) => {
            let previous = replica.get(ticket.id).ok().flatten().map(|t| t.status);
            if let Some(from) = previous.filter(|from| *from != ticket.status) {
                TICKET_STATUS_TRANSITIONS
                    .with_label_values(&[from.as_str(), ticket.status.as_str()])
                    .inc();
            }
        }
        TicketEvent::Deleted { .. } => TICKETS_DELETED_TOTAL.inc(),
    }
}
