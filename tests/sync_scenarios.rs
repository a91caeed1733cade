use async_trait::async_trait;
use boardsync::agent::{
    ApplyResult, EditorViewState, SyncAgent, SyncTransport, TransportError,
};
use boardsync::models::{
    BoardResponse, BoardSnapshot, ConflictResponse, PresenceEntry, SaveElementsRequest,
    SaveElementsResponse, ServerMessage,
};
use boardsync::store::memory::MemoryStore;
use boardsync::sync::guard::{ApplyOutcome, GuardError};
use boardsync::AppState;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Drives the engine directly, the way the HTTP layer does, so agent and
/// server semantics can be exercised together without a live server.
struct EngineTransport {
    state: Arc<AppState>,
    user: String,
}

#[async_trait]
impl SyncTransport for EngineTransport {
    async fn try_apply(
        &self,
        board_id: Uuid,
        request: &SaveElementsRequest,
        connection_id: Option<Uuid>,
    ) -> Result<ApplyResult, TransportError> {
        let (proposed, known_version) = request.clone().into_snapshot();
        let origin = connection_id.unwrap_or_else(Uuid::nil);
        match self
            .state
            .guard
            .try_apply(board_id, proposed, known_version, &self.user, origin)
            .await
        {
            Ok(ApplyOutcome::Accepted { new_version }) => {
                Ok(ApplyResult::Accepted(SaveElementsResponse {
                    elements: request.elements.clone(),
                    view_state: request.view_state.clone(),
                    version: new_version,
                }))
            }
            Ok(ApplyOutcome::Conflict { current }) => {
                Ok(ApplyResult::Conflict(ConflictResponse {
                    current_elements: current.snapshot.elements,
                    current_view_state: current.snapshot.view_state,
                    current_files: current.snapshot.files,
                    current_version: current.version,
                }))
            }
            Err(GuardError::NotFound) => Err(TransportError::NotFound),
            Err(GuardError::Store(e)) => Err(TransportError::Transient(e.to_string())),
        }
    }

    async fn fetch_latest(&self, board_id: Uuid) -> Result<BoardResponse, TransportError> {
        match self.state.store.load(board_id).await {
            Ok(Some(record)) => Ok(BoardResponse::from_record(record)),
            Ok(None) => Err(TransportError::NotFound),
            Err(e) => Err(TransportError::Transient(e.to_string())),
        }
    }
}

async fn engine_with_board() -> (Arc<AppState>, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(store, 64));
    let board_id = Uuid::new_v4();
    state
        .store
        .create(board_id, BoardSnapshot::default(), "setup")
        .await
        .unwrap();
    (state, board_id)
}

fn elements(label: &str) -> Vec<serde_json::Value> {
    vec![serde_json::json!({ "id": label, "type": "rectangle" })]
}

fn save_request(label: &str, version: u64) -> SaveElementsRequest {
    SaveElementsRequest {
        elements: elements(label),
        view_state: Default::default(),
        files: BTreeMap::new(),
        version,
    }
}

/// Advance the board through `n` accepted writes and return the version.
async fn advance(state: &Arc<AppState>, board_id: Uuid, from: u64, n: u64, user: &str) -> u64 {
    let transport = EngineTransport {
        state: state.clone(),
        user: user.to_string(),
    };
    let mut version = from;
    for i in 0..n {
        let request = save_request(&format!("{}-{}", user, i), version);
        match transport.try_apply(board_id, &request, None).await.unwrap() {
            ApplyResult::Accepted(response) => version = response.version,
            ApplyResult::Conflict(_) => panic!("Unexpected conflict while advancing"),
        }
    }
    version
}

#[tokio::test]
async fn debounced_burst_produces_one_accepted_write() {
    let (state, board_id) = engine_with_board().await;
    let transport = EngineTransport {
        state: state.clone(),
        user: "alice".to_string(),
    };

    let mut agent = SyncAgent::new(BoardSnapshot::default(), 0, DEBOUNCE);
    let view = EditorViewState::default();
    let t0 = Instant::now();

    // Three rapid edits inside one debounce window.
    agent.note_local_edit(elements("e1"), &view, BTreeMap::new(), t0);
    agent.note_local_edit(elements("e2"), &view, BTreeMap::new(), t0 + Duration::from_millis(40));
    agent.note_local_edit(elements("e3"), &view, BTreeMap::new(), t0 + Duration::from_millis(80));

    let request = agent
        .poll_flush(t0 + Duration::from_millis(500))
        .expect("one flush for the burst");
    let body = SaveElementsRequest {
        elements: request.snapshot.elements.clone(),
        view_state: request.snapshot.view_state.clone(),
        files: request.snapshot.files.clone(),
        version: request.known_version,
    };
    match transport.try_apply(board_id, &body, None).await.unwrap() {
        ApplyResult::Accepted(response) => {
            assert!(agent
                .on_flush_success(response.version, Instant::now())
                .is_none());
        }
        other => panic!("Expected acceptance, got {:?}", other),
    }

    // Exactly one version increment for the whole burst.
    assert_eq!(agent.version(), 1);
    let record = state.store.load(board_id).await.unwrap().unwrap();
    assert_eq!(record.version, 1);
    assert_eq!(record.snapshot.elements, elements("e3"));
    assert!(agent.poll_flush(Instant::now() + Duration::from_secs(5)).is_none());
}

#[tokio::test]
async fn concurrent_writers_from_version_five_converge() {
    let (state, board_id) = engine_with_board().await;
    advance(&state, board_id, 0, 5, "setup").await;

    let alice = EngineTransport {
        state: state.clone(),
        user: "alice".to_string(),
    };
    let bob = EngineTransport {
        state: state.clone(),
        user: "bob".to_string(),
    };

    // Both clients hold knownVersion=5 and write concurrently.
    let alice_request = save_request("from-alice", 5);
    let bob_request = save_request("from-bob", 5);
    let a = alice.try_apply(board_id, &alice_request, None);
    let b = bob.try_apply(board_id, &bob_request, None);
    let (a, b) = tokio::join!(a, b);
    let outcomes = vec![a.unwrap(), b.unwrap()];

    let mut accepted = 0;
    for outcome in &outcomes {
        match outcome {
            ApplyResult::Accepted(response) => {
                accepted += 1;
                assert_eq!(response.version, 6);
            }
            ApplyResult::Conflict(conflict) => {
                // The loser must see a version >= the winner's new version
                // and adopt the authoritative snapshot it carries.
                assert_eq!(conflict.current_version, 6);
                assert!(!conflict.current_elements.is_empty());
            }
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(state.store.load(board_id).await.unwrap().unwrap().version, 6);
}

#[tokio::test]
async fn loser_discards_batch_and_adopts_winner_state() {
    let (state, board_id) = engine_with_board().await;
    advance(&state, board_id, 0, 5, "setup").await;

    let transport = EngineTransport {
        state: state.clone(),
        user: "bob".to_string(),
    };

    let mut agent = SyncAgent::new(BoardSnapshot::default(), 5, DEBOUNCE);
    let view = EditorViewState::default();
    let t0 = Instant::now();
    agent.note_local_edit(elements("bobs-edit"), &view, BTreeMap::new(), t0);
    let request = agent.poll_flush(t0 + Duration::from_millis(301)).unwrap();

    // Alice wins the race to version 6 while Bob's write is in flight.
    advance(&state, board_id, 5, 1, "alice").await;

    let body = SaveElementsRequest {
        elements: request.snapshot.elements.clone(),
        view_state: request.snapshot.view_state.clone(),
        files: request.snapshot.files.clone(),
        version: request.known_version,
    };
    match transport.try_apply(board_id, &body, None).await.unwrap() {
        ApplyResult::Conflict(conflict) => {
            assert!(agent
                .on_flush_conflict(
                    BoardSnapshot {
                        elements: conflict.current_elements,
                        view_state: conflict.current_view_state,
                        files: conflict.current_files,
                    },
                    conflict.current_version,
                )
                .is_none());
        }
        other => panic!("Expected conflict, got {:?}", other),
    }

    assert_eq!(agent.version(), 6);
    assert_eq!(agent.document().elements, elements("alice-0"));
    // The discarded local edit is gone, not queued for replay.
    assert!(agent.poll_flush(Instant::now() + Duration::from_secs(5)).is_none());
}

#[tokio::test]
async fn stale_write_from_version_four_reports_current_seven() {
    let (state, board_id) = engine_with_board().await;
    advance(&state, board_id, 0, 7, "alice").await;

    let transport = EngineTransport {
        state,
        user: "bob".to_string(),
    };
    match transport
        .try_apply(board_id, &save_request("stale", 4), None)
        .await
        .unwrap()
    {
        ApplyResult::Conflict(conflict) => assert_eq!(conflict.current_version, 7),
        other => panic!("Expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn reconnecting_client_resyncs_to_the_latest_version() {
    let (state, board_id) = engine_with_board().await;
    advance(&state, board_id, 0, 6, "setup").await;

    // B is in sync at version 6, then loses its channel.
    let mut b_agent = SyncAgent::new(
        state
            .store
            .load(board_id)
            .await
            .unwrap()
            .unwrap()
            .snapshot,
        6,
        DEBOUNCE,
    );

    // While B is away, A performs three accepted writes: 6 -> 9.
    let reached = advance(&state, board_id, 6, 3, "alice").await;
    assert_eq!(reached, 9);

    // On reconnect, B fetches the authoritative document once.
    let transport = EngineTransport {
        state: state.clone(),
        user: "bob".to_string(),
    };
    let latest = transport.fetch_latest(board_id).await.unwrap();
    let (snapshot, version) = latest.into_snapshot();
    b_agent.on_resync(snapshot, version);

    assert_eq!(b_agent.version(), 9);
    let record = state.store.load(board_id).await.unwrap().unwrap();
    assert_eq!(b_agent.document(), &record.snapshot);
}

#[tokio::test]
async fn broadcasts_converge_live_subscribers() {
    let (state, board_id) = engine_with_board().await;

    // B subscribes to the channel; A writes with its own connection id.
    let a_conn = Uuid::new_v4();
    let mut b_rx = state.channels.subscribe(board_id).await;
    let mut b_agent = SyncAgent::new(BoardSnapshot::default(), 0, DEBOUNCE);

    let transport = EngineTransport {
        state: state.clone(),
        user: "alice".to_string(),
    };
    match transport
        .try_apply(board_id, &save_request("shared", 0), Some(a_conn))
        .await
        .unwrap()
    {
        ApplyResult::Accepted(response) => assert_eq!(response.version, 1),
        other => panic!("Expected acceptance, got {:?}", other),
    }

    let event = b_rx.recv().await.unwrap();
    assert_eq!(event.origin, a_conn);
    match event.message {
        ServerMessage::ElementsUpdated(msg) => {
            assert_eq!(msg.updated_by, "alice");
            b_agent.on_remote_update(msg);
        }
        other => panic!("Expected elements-updated, got {:?}", other),
    }

    // B's local state now equals A's accepted state at version 1.
    assert_eq!(b_agent.version(), 1);
    let record = state.store.load(board_id).await.unwrap().unwrap();
    assert_eq!(b_agent.document(), &record.snapshot);
}

#[tokio::test]
async fn presence_join_sends_snapshot_to_joiner_and_events_to_members() {
    let (state, board_id) = engine_with_board().await;

    let alice = PresenceEntry {
        user_id: "alice".to_string(),
        display_name: "Alice".to_string(),
        connection_id: Uuid::new_v4(),
    };
    let bob = PresenceEntry {
        user_id: "bob".to_string(),
        display_name: "Bob".to_string(),
        connection_id: Uuid::new_v4(),
    };
    let carol = PresenceEntry {
        user_id: "carol".to_string(),
        display_name: "Carol".to_string(),
        connection_id: Uuid::new_v4(),
    };

    let mut alice_rx = state.channels.subscribe(board_id).await;
    state.presence.join(board_id, alice.clone()).await;
    // Alice drops her own join echo.
    assert!(alice_rx.recv().await.unwrap().is_echo_for(alice.connection_id));

    let mut bob_rx = state.channels.subscribe(board_id).await;
    let bob_snapshot = state.presence.join(board_id, bob.clone()).await;
    assert_eq!(bob_snapshot.len(), 1);
    alice_rx.recv().await.unwrap(); // bob's join seen by alice
    assert!(bob_rx.recv().await.unwrap().is_echo_for(bob.connection_id));

    // Carol joins a board with 2 existing members.
    let carol_snapshot = state.presence.join(board_id, carol.clone()).await;
    assert_eq!(carol_snapshot.len(), 2);

    // Each existing member receives exactly one member-added event for Carol.
    for rx in [&mut alice_rx, &mut bob_rx] {
        let event = rx.recv().await.unwrap();
        match event.message {
            ServerMessage::PresenceJoin(msg) => assert_eq!(msg.member.user_id, "carol"),
            other => panic!("Expected presence-join, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
