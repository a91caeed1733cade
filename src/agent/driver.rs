use crate::agent::machine::{EditorViewState, RemoteApplyToken, SyncAgent};
use crate::agent::transport::{ApplyResult, SyncTransport, TransportError};
use crate::models::{
    BoardSnapshot, ElementsUpdatedMessage, FileBlob, SaveElementsRequest, ServerMessage,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};
use uuid::Uuid;

/// One local edit captured from the drawing surface.
#[derive(Debug, Clone)]
pub struct LocalEdit {
    pub elements: Vec<serde_json::Value>,
    pub view: EditorViewState,
    pub files: BTreeMap<String, FileBlob>,
}

/// What the driver hands to the host editor.
pub enum HostEvent {
    /// The editor must replace its contents with `message`. The token keeps
    /// the agent's feedback suppression armed; the host holds it until the
    /// update has been applied, so change callbacks fired by the application
    /// are not captured as new local edits.
    Apply {
        message: ElementsUpdatedMessage,
        token: RemoteApplyToken,
    },
    /// Informational (presence changes); no editor content involved.
    Notify(ServerMessage),
}

pub struct SyncDriverConfig {
    pub board_id: Uuid,
    /// Full channel URL including the auth token query parameter.
    pub channel_url: String,
    pub debounce: Duration,
    pub heartbeat: Duration,
    pub reconnect_backoff: Duration,
}

#[derive(Debug)]
pub enum DriverError {
    /// The board no longer exists; writing stopped. The user should be
    /// prompted to navigate away.
    BoardGone,
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::BoardGone => write!(f, "Board no longer exists"),
        }
    }
}

impl std::error::Error for DriverError {}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}

/// Drives one board session: batches local edits through the sync state
/// machine, keeps the channel subscription alive with reconnect + resync,
/// and forwards applied server messages to the host for rendering.
///
/// Runs as a single task per open board view; it never issues two
/// overlapping write calls for the same board.
pub struct SyncDriver<T: SyncTransport> {
    transport: Arc<T>,
    config: SyncDriverConfig,
}

impl<T: SyncTransport> SyncDriver<T> {
    pub fn new(transport: Arc<T>, config: SyncDriverConfig) -> Self {
        Self { transport, config }
    }

    async fn initial_fetch(&self) -> Result<(crate::models::BoardSnapshot, u64), DriverError> {
        loop {
            match self.transport.fetch_latest(self.config.board_id).await {
                Ok(latest) => return Ok(latest.into_snapshot()),
                Err(TransportError::NotFound) => return Err(DriverError::BoardGone),
                Err(TransportError::Transient(e)) => {
                    warn!("Initial board fetch failed, retrying: {}", e);
                    tokio::time::sleep(self.config.reconnect_backoff).await;
                }
            }
        }
    }

    /// Run the session until the edit source closes (the user navigated
    /// away) or the board disappears. Dropping the edit sender cancels the
    /// session; any pending write is simply dropped.
    pub async fn run(
        self,
        mut edits: mpsc::Receiver<LocalEdit>,
        events: mpsc::Sender<HostEvent>,
    ) -> Result<(), DriverError> {
        let board_id = self.config.board_id;
        let (snapshot, version) = self.initial_fetch().await?;
        let mut agent = SyncAgent::new(snapshot, version, self.config.debounce);

        let mut connection_id: Option<Uuid> = None;
        let mut ws: Option<(WsSink, WsSource)> = None;
        let mut needs_resync = false;
        let mut heartbeat = tokio::time::interval(self.config.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if ws.is_none() {
                match connect_async(&self.config.channel_url).await {
                    Ok((stream, _response)) => {
                        info!("Channel subscribed for board {}", board_id);
                        ws = Some(stream.split());
                        if needs_resync {
                            // Correct anything missed while disconnected
                            // before trusting live updates again.
                            match self.transport.fetch_latest(board_id).await {
                                Ok(latest) => {
                                    let (snapshot, version) = latest.into_snapshot();
                                    agent.on_resync(snapshot, version);
                                    needs_resync = false;
                                }
                                Err(TransportError::NotFound) => return Err(DriverError::BoardGone),
                                Err(TransportError::Transient(e)) => {
                                    warn!("Resync fetch failed: {}", e);
                                    ws = None;
                                    tokio::time::sleep(self.config.reconnect_backoff).await;
                                    continue;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Channel connect failed for board {}: {}", board_id, e);
                        tokio::time::sleep(self.config.reconnect_backoff).await;
                        continue;
                    }
                }
            }
            let Some((sink, source)) = ws.as_mut() else {
                continue;
            };

            let mut drop_channel = false;
            tokio::select! {
                maybe_edit = edits.recv() => match maybe_edit {
                    Some(edit) => {
                        agent.note_local_edit(edit.elements, &edit.view, edit.files, Instant::now());
                    }
                    None => {
                        info!("Board view closed; dropping pending write for {}", board_id);
                        return Ok(());
                    }
                },

                maybe_msg = source.next() => match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(ServerMessage::ElementsUpdated(msg)) => {
                                use crate::agent::machine::RemoteOutcome;
                                match agent.on_remote_update(msg.clone()) {
                                    RemoteOutcome::Stale => {}
                                    RemoteOutcome::Buffered => {}
                                    RemoteOutcome::Applied => {
                                        let token = agent.remote_apply_token();
                                        let _ = events
                                            .send(HostEvent::Apply { message: msg, token })
                                            .await;
                                    }
                                }
                            }
                            Ok(ServerMessage::PresenceSnapshot(msg)) => {
                                connection_id = Some(msg.connection_id);
                                let _ = events
                                    .send(HostEvent::Notify(ServerMessage::PresenceSnapshot(msg)))
                                    .await;
                            }
                            Ok(ServerMessage::Pong(_)) => {}
                            Ok(other) => {
                                let _ = events.send(HostEvent::Notify(other)).await;
                            }
                            Err(e) => {
                                error!("Failed to parse channel message: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("Channel closed for board {}", board_id);
                        drop_channel = true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Channel error for board {}: {}", board_id, e);
                        drop_channel = true;
                    }
                },

                _ = heartbeat.tick() => {
                    let ping = r#"{"type":"ping"}"#.to_string();
                    if sink.send(Message::Text(ping)).await.is_err() {
                        drop_channel = true;
                    }
                },

                _ = wait_until(agent.next_deadline()) => {
                    if let Some(request) = agent.poll_flush(Instant::now()) {
                        let body = SaveElementsRequest {
                            elements: request.snapshot.elements,
                            view_state: request.snapshot.view_state,
                            files: request.snapshot.files,
                            version: request.known_version,
                        };
                        match self.transport.try_apply(board_id, &body, connection_id).await {
                            Ok(ApplyResult::Accepted(response)) => {
                                // A broadcast buffered during the flight
                                // supersedes the flushed content; it must
                                // reach the editor or the screen stays on
                                // state the agent no longer tracks.
                                if let Some(adopted) =
                                    agent.on_flush_success(response.version, Instant::now())
                                {
                                    let token = agent.remote_apply_token();
                                    let _ = events
                                        .send(HostEvent::Apply { message: adopted, token })
                                        .await;
                                }
                            }
                            Ok(ApplyResult::Conflict(conflict)) => {
                                let version = conflict.current_version;
                                let authoritative = BoardSnapshot {
                                    elements: conflict.current_elements,
                                    view_state: conflict.current_view_state,
                                    files: conflict.current_files,
                                };
                                let fallback = ElementsUpdatedMessage {
                                    version,
                                    elements: authoritative.elements.clone(),
                                    view_state: authoritative.view_state.clone(),
                                    files: authoritative.files.clone(),
                                    updated_by: String::new(),
                                };
                                // A buffered broadcast newer than the
                                // conflict snapshot wins over it.
                                let message = agent
                                    .on_flush_conflict(authoritative, version)
                                    .unwrap_or(fallback);
                                let token = agent.remote_apply_token();
                                let _ = events
                                    .send(HostEvent::Apply { message, token })
                                    .await;
                            }
                            Err(TransportError::Transient(e)) => {
                                warn!("Write failed for board {}, will retry: {}", board_id, e);
                                agent.on_flush_error(Instant::now());
                            }
                            Err(TransportError::NotFound) => {
                                error!("Board {} is gone; stopping writes", board_id);
                                return Err(DriverError::BoardGone);
                            }
                        }
                    }
                },
            }

            if drop_channel {
                ws = None;
                needs_resync = true;
            }
        }
    }
}
