use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection::ConnectionHandle;
use crate::error::PresenceError;
use crate::metrics::{WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION};
use crate::server::AppState;

use super::message::{ClientSignal, ServerSignal};

const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Identity attached to the channel. Authentication happens upstream;
    /// by the time the upgrade reaches this service the user is known.
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, query))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let user_id = match query.user_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return (StatusCode::BAD_REQUEST, "Missing userId").into_response();
        }
    };

    tracing::info!(user_id = %user_id, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, user_id),
    fields(user_id = %user_id, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let connection_start = std::time::Instant::now();

    // Channel for signals headed to this connection
    let (tx, mut rx) = mpsc::channel::<ServerSignal>(CHANNEL_BUFFER_SIZE);

    let handle = match state.coordinator.register(user_id.clone(), tx) {
        Ok(h) => h,
        Err(e) => {
            // DuplicateConnection indicates a transport-layer bug; fatal
            // for this connection only
            tracing::error!(user_id = %user_id, error = %e, "Connection rejected");
            let (mut ws_sender, _) = socket.split();
            let error_signal = ServerSignal::error("DUPLICATE_CONNECTION", e.to_string());
            if let Ok(json) = serde_json::to_string(&error_signal) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    WS_CONNECTIONS_OPENED.inc();

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending signals from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            let text = match serde_json::to_string(&signal) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize signal");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving signals from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    // Retract room membership and publish updated snapshots. The stale
    // cleanup task may already have disconnected us; that is a no-op here.
    match state.coordinator.disconnect(connection_id) {
        Ok(changed_rooms) => {
            for event_id in changed_rooms {
                state.dispatcher.publish_membership(&event_id);
            }
        }
        Err(PresenceError::UnknownConnection(_)) => {
            tracing::debug!(connection_id = %connection_id, "Connection already disconnected");
        }
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Disconnect failed");
        }
    }

    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            let signal: ClientSignal = match serde_json::from_str(&text) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client signal");
                    let _ = handle
                        .send(ServerSignal::error("INVALID_SIGNAL", e.to_string()))
                        .await;
                    return true;
                }
            };

            handle_client_signal(signal, state, handle).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .send(ServerSignal::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) => {
            handle.update_activity();
            // Axum answers the pong automatically; we only track activity
            true
        }
        Message::Pong(_) => {
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client signal
#[tracing::instrument(
    name = "ws.signal",
    skip(state, handle, signal),
    fields(
        connection_id = %handle.id,
        user_id = %handle.user_id,
        signal_type = ?signal
    )
)]
async fn handle_client_signal(
    signal: ClientSignal,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) {
    match signal {
        ClientSignal::JoinEvent { event_id } => {
            match state.coordinator.join(handle.id, &event_id) {
                Ok(true) => {
                    state.dispatcher.publish_membership(&event_id);
                }
                Ok(false) => {
                    // Membership unchanged (multi-tab or re-join); silent
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %handle.id,
                        event_id = %event_id,
                        error = %e,
                        "Join signal dropped"
                    );
                }
            }
        }
        ClientSignal::LeaveEvent { event_id } => {
            match state.coordinator.leave(handle.id, &event_id) {
                Ok(true) => {
                    state.dispatcher.publish_membership(&event_id);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        connection_id = %handle.id,
                        event_id = %event_id,
                        error = %e,
                        "Leave signal dropped"
                    );
                }
            }
        }
        ClientSignal::ChatMessage { event_id, body } => {
            match state
                .dispatcher
                .publish_chat_message(handle, &event_id, body)
            {
                Ok(_) => {}
                Err(e @ PresenceError::NotJoined { .. }) => {
                    // No broadcast occurs; tell the sender only,
                    // best-effort
                    tracing::warn!(
                        connection_id = %handle.id,
                        event_id = %event_id,
                        "Chat signal rejected, sender not in room"
                    );
                    let _ = handle
                        .send(ServerSignal::error("NOT_JOINED", e.to_string()))
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %handle.id,
                        event_id = %event_id,
                        error = %e,
                        "Chat signal dropped"
                    );
                }
            }
        }
        ClientSignal::Ping => {
            let _ = handle.send(ServerSignal::Pong).await;
        }
    }
}
