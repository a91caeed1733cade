use crate::models::{
    ClientMessage, PongMessage, PresenceEntry, PresenceSnapshotMessage, ServerMessage,
};
use crate::services::auth_service::UserIdentity;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, State,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Board channel handler: upgrades to a websocket subscribed to the board's
/// real-time channel.
pub async fn board_channel(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<UserIdentity>,
    Path(board_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    info!("New channel connection attempt for board {}", board_id);
    ws.on_upgrade(move |socket| handle_socket(socket, board_id, identity, state))
}

async fn send_json(
    sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    message: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(message).map_err(|e| {
        error!("Failed to serialize channel message: {}", e);
    })?;
    sender
        .lock()
        .await
        .send(Message::Text(text))
        .await
        .map_err(|_| ())
}

/// Handle one channel connection: presence join with a member snapshot,
/// broadcast forwarding with echo suppression, ping heartbeats, presence
/// leave on disconnect.
async fn handle_socket(
    mut socket: WebSocket,
    board_id: Uuid,
    identity: UserIdentity,
    state: Arc<AppState>,
) {
    // Generate unique connection ID to identify this client
    let connection_id = Uuid::new_v4();

    // The board must exist before anything subscribes to it.
    match state.store.load(board_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!("Channel requested for unknown board {}", board_id);
            let _ = socket.close().await;
            return;
        }
        Err(e) => {
            error!("Error loading board '{}' for channel: {}", board_id, e);
            let _ = socket.close().await;
            return;
        }
    }

    info!(
        "Channel connection established for board {}: user={} connection={}",
        board_id, identity.user_id, connection_id
    );

    // Split the socket into sender and receiver
    let (sender, mut receiver) = socket.split();
    let sender1 = Arc::new(Mutex::new(sender));
    let sender2 = sender1.clone();

    // Subscribe before joining presence so this connection cannot miss its
    // own join window.
    let mut rx = state.channels.subscribe(board_id).await;

    let entry = PresenceEntry {
        user_id: identity.user_id.clone(),
        display_name: identity.display_name.clone(),
        connection_id,
    };
    let members = state.presence.join(board_id, entry).await;

    // The joiner receives the current member list as a snapshot, plus the
    // connection id it must use to mark its own writes.
    let snapshot = ServerMessage::PresenceSnapshot(PresenceSnapshotMessage {
        connection_id,
        members,
    });
    if send_json(&sender1, &snapshot).await.is_err() {
        state.presence.leave(board_id, connection_id).await;
        drop(rx);
        state.channels.release(board_id).await;
        state.guard.release(board_id).await;
        return;
    }

    // Task reading client messages: only heartbeats come upstream, writes
    // go over HTTP.
    let heartbeat_state = state.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(Ok(Message::Text(msg))) = receiver.next().await {
            let client_msg: ClientMessage = match serde_json::from_str(&msg) {
                Ok(client_msg) => client_msg,
                Err(e) => {
                    error!("Failed to parse channel message for board {}: {}", board_id, e);
                    continue;
                }
            };

            match client_msg {
                ClientMessage::Ping => {
                    heartbeat_state
                        .presence
                        .heartbeat(board_id, connection_id)
                        .await;
                    let pong = ServerMessage::Pong(PongMessage {
                        date: Utc::now().to_rfc3339(),
                    });
                    if send_json(&sender1, &pong).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Task forwarding broadcast events to the client
    let mut recv_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    // Skip messages from this connection to prevent echo
                    if event.is_echo_for(connection_id) {
                        continue;
                    }
                    let text = match serde_json::to_string(&event.message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize broadcast event: {}", e);
                            continue;
                        }
                    };
                    if sender2.lock().await.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // The client detects the gap by version comparison and
                    // resyncs; nothing to replay here.
                    warn!(
                        "Connection {} lagged behind, {} events dropped",
                        connection_id, missed
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    state.presence.leave(board_id, connection_id).await;
    state.channels.release(board_id).await;
    state.guard.release(board_id).await;
    info!(
        "Channel connection terminated for board {}: connection={}",
        board_id, connection_id
    );
}
