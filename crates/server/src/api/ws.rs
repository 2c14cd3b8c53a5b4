//! WebSocket session for live ticket updates.
//!
//! Every session receives the ticket event stream in publish order. Clients
//! may also send commands, which one task per session applies in arrival
//! order:
//!
//! - `tickets:request` with search filters, answered with `tickets:data`
//! - `ticket:update` with an id and a partial update, applied through the
//!   lifecycle manager and then seen by every session as `ticket:updated`
//!
//! Failures are answered with `tickets:error` to the requesting session only.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use despacho_core::{SearchPage, TicketEvent, TicketPatch};

use super::response::ApiError;
use super::tickets::SearchParams;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// Pending commands per session before the reader waits.
const COMMAND_QUEUE: usize = 32;

/// Message sent by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "tickets:request")]
    Request(SearchParams),
    #[serde(rename = "ticket:update")]
    Update(UpdateCommand),
}

/// A partial ticket update addressed by id.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCommand {
    pub id: i64,
    #[serde(flatten)]
    pub patch: TicketPatch,
}

/// Message sent to one session only.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum SessionMessage {
    /// Open work at connect time.
    #[serde(rename = "tickets:snapshot", rename_all = "camelCase")]
    Snapshot { pending: u64, in_progress: u64 },
    #[serde(rename = "tickets:data")]
    Data(SearchPage),
    #[serde(rename = "tickets:error")]
    Error { message: String },
}

impl SessionMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionMessage::Snapshot { .. } => "tickets:snapshot",
            SessionMessage::Data(_) => "tickets:data",
            SessionMessage::Error { .. } => "tickets:error",
        }
    }

    fn error(message: impl Into<String>) -> Self {
        SessionMessage::Error {
            message: message.into(),
        }
    }
}

impl From<ApiError> for SessionMessage {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Internal(detail) => {
                error!("Session command failed: {}", detail);
                SessionMessage::error("Internal server error")
            }
            other => SessionMessage::error(other.to_string()),
        }
    }
}

/// Build the snapshot sent on connect.
pub fn snapshot(state: &AppState) -> SessionMessage {
    match state.lifecycle().status_counts() {
        Ok(counts) => SessionMessage::Snapshot {
            pending: counts.pending,
            in_progress: counts.in_progress,
        },
        Err(e) => SessionMessage::from(ApiError::from(e)),
    }
}

/// Apply one client command. Returns the reply for the requesting session,
/// if any; a successful update has none since it arrives as a broadcast.
pub fn process_command(state: &AppState, command: ClientMessage) -> Option<SessionMessage> {
    match command {
        ClientMessage::Request(params) => {
            let result = params
                .into_query(state.lifecycle().zone())
                .and_then(|query| state.lifecycle().search(&query).map_err(ApiError::from));
            Some(match result {
                Ok(page) => SessionMessage::Data(page),
                Err(e) => e.into(),
            })
        }
        ClientMessage::Update(UpdateCommand { id, patch }) => {
            match state.lifecycle().update(id, patch) {
                Ok(_) => None,
                Err(e) => Some(ApiError::from(e).into()),
            }
        }
    }
}

/// What the writer forwards to the socket.
enum Outbound {
    Broadcast(TicketEvent),
    Reply(SessionMessage),
}

impl Outbound {
    fn event_name(&self) -> &'static str {
        match self {
            Outbound::Broadcast(event) => event.event_name(),
            Outbound::Reply(message) => message.event_name(),
        }
    }

    fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Outbound::Broadcast(event) => serde_json::to_string(event),
            Outbound::Reply(message) => serde_json::to_string(message),
        }
    }
}

/// Serialize and send one message. Returns false once the client is gone.
async fn send(sink: &mut SplitSink<WebSocket, Message>, outbound: Outbound) -> bool {
    let json = match outbound.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize {}: {}", outbound.event_name(), e);
            return true;
        }
    };
    if sink.send(Message::Text(json.into())).await.is_err() {
        return false;
    }
    WS_MESSAGES_SENT
        .with_label_values(&[outbound.event_name()])
        .inc();
    true
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no event falls in between.
    let mut events = state.broadcaster().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!(%session, "WebSocket client connected");

    if !send(&mut sender, Outbound::Reply(snapshot(&state))).await {
        WS_CONNECTIONS_ACTIVE.dec();
        debug!(%session, "WebSocket client left before the snapshot");
        return;
    }

    let (command_tx, mut command_rx) = mpsc::channel::<ClientMessage>(COMMAND_QUEUE);
    let (reply_tx, mut reply_rx) = mpsc::channel::<SessionMessage>(COMMAND_QUEUE);

    // Commands are applied one at a time, in arrival order.
    let actor_state = Arc::clone(&state);
    let actor_replies = reply_tx.clone();
    let actor = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            if let Some(reply) = process_command(&actor_state, command) {
                if actor_replies.send(reply).await.is_err() {
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        loop {
            // Broadcasts first, so a reply never overtakes an event committed before it.
            let outbound = tokio::select! {
                biased;

                result = events.recv() => match result {
                    Ok(event) => Outbound::Broadcast(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%session, "WebSocket client lagged, skipped {} events", n);
                        WS_LAG_EVENTS.inc();
                        Outbound::Reply(SessionMessage::error(format!(
                            "Missed {} ticket updates, reload tickets",
                            n
                        )))
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(%session, "Broadcast channel closed");
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(message) => Outbound::Reply(message),
                    None => break,
                },
            };
            if !send(&mut sender, outbound).await {
                debug!(%session, "WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(command) => {
                        if command_tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(%session, "Invalid client message: {}", e);
                        let reply = SessionMessage::error(format!("Invalid message: {}", e));
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!(%session, "WebSocket client requested close");
                break;
            }
            Ok(_) => {
                // Ping/pong is answered by axum; binary frames are ignored.
            }
            Err(e) => {
                warn!(%session, "WebSocket receive error: {}", e);
                break;
            }
        }
    }

    drop(command_tx);
    actor.abort();
    writer.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!(%session, "WebSocket client disconnected");
}
