// WebSocket transport: one task per connection, join vocabulary, and
// heartbeat supervision.
//
// Scope membership lives in the registry only for as long as the socket
// does. Cleanup on any exit path removes every membership in one step.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bellhop_common::protocol::ws::WsMessage;
use bellhop_common::types::{Scope, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::App;
use crate::error::ErrorCode;
use crate::metrics;

const HEARTBEAT_INTERVAL_MS: u32 = 15_000;
const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
const MAX_FRAME_BYTES: usize = 65_536;

pub fn router(app: App) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(app)
}

async fn ws_upgrade(State(app): State<App>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(app, socket))
}

async fn handle_socket(app: App, mut socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    app.registry.register(connection_id, outbound_sender).await;
    metrics::connection_opened();
    info!(connection_id = %connection_id, "connection opened");

    let welcome =
        WsMessage::Welcome { connection_id, heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS };
    if send_ws_message(&mut socket, &welcome).await.is_err() {
        cleanup(&app, connection_id).await;
        return;
    }

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if
    // no pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval = tokio::time::interval(std::time::Duration::from_millis(
        HEARTBEAT_INTERVAL_MS as u64,
    ));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(connection_id = %connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if send_ws_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        let reply = match serde_json::from_str::<WsMessage>(&raw_message) {
                            Ok(inbound) => {
                                handle_client_message(&app, connection_id, inbound).await
                            }
                            Err(_) => Some(ErrorCode::InvalidMessage.frame()),
                        };

                        if let Some(reply) = reply {
                            if send_ws_message(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    cleanup(&app, connection_id).await;
    info!(connection_id = %connection_id, "connection closed");
}

async fn send_ws_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let encoded = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

async fn cleanup(app: &App, connection_id: Uuid) {
    app.registry.remove(connection_id).await;
    metrics::connection_closed();
}

/// Handle one client frame. Returns the frame to send back, if any.
async fn handle_client_message(
    app: &App,
    connection_id: Uuid,
    message: WsMessage,
) -> Option<WsMessage> {
    match try_handle_client_message(app, connection_id, message).await {
        Ok(reply) => reply,
        Err(error_frame) => Some(error_frame),
    }
}

async fn try_handle_client_message(
    app: &App,
    connection_id: Uuid,
    message: WsMessage,
) -> Result<Option<WsMessage>, WsMessage> {
    match message {
        WsMessage::JoinUser { user_id } => {
            let id = required(&user_id)?;
            Ok(Some(join_scope(app, connection_id, Scope::user(id)).await))
        }
        WsMessage::JoinOrg { org_id } => {
            let id = required(&org_id)?;
            Ok(Some(join_scope(app, connection_id, Scope::org(id)).await))
        }
        WsMessage::JoinRole { org_id, role } => {
            let org = required(&org_id)?;
            let role = required(&role)?;
            Ok(Some(join_scope(app, connection_id, Scope::role(org, role)).await))
        }
        WsMessage::JoinWaiter { org_id } => {
            let org = required(&org_id)?;
            Ok(Some(join_scope(app, connection_id, Scope::waiter(org)).await))
        }
        WsMessage::CallBell { target_user, payload } => {
            app.signaling.relay(&target_user, SignalKind::CallBell, payload).await;
            Ok(None)
        }
        WsMessage::WebrtcSignal { target_user, kind, payload } => {
            app.signaling.relay(&target_user, kind, payload).await;
            Ok(None)
        }
        // Server-to-client frames are not accepted from clients.
        WsMessage::Welcome { .. }
        | WsMessage::Joined { .. }
        | WsMessage::Event { .. }
        | WsMessage::Error { .. } => Ok(Some(ErrorCode::UnsupportedMessage.frame())),
    }
}

/// Reject blank identifiers before any state mutation. A rejection
/// becomes the error reply directly.
fn required(value: &str) -> Result<&str, WsMessage> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ErrorCode::JoinMissingId.frame())
    } else {
        Ok(trimmed)
    }
}

async fn join_scope(app: &App, connection_id: Uuid, scope: Scope) -> WsMessage {
    app.registry.join(connection_id, scope.clone()).await;
    WsMessage::Joined { scope }
}
