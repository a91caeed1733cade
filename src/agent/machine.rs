use crate::models::{BoardSnapshot, ElementsUpdatedMessage, FileBlob, ViewState};
use crate::utils::scope_guard::ScopeGuard;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The editor's full view state, including per-client camera fields.
///
/// Only `synced()` fields ever leave the client; zoom and scroll are local
/// camera state and must not leak into the shared document, where they
/// would thrash every other collaborator's viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorViewState {
    pub background_color: String,
    pub font_family: String,
    pub zoom: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

impl Default for EditorViewState {
    fn default() -> Self {
        let shared = ViewState::default();
        Self {
            background_color: shared.background_color,
            font_family: shared.font_family,
            zoom: 1.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

impl EditorViewState {
    /// Reduce to the synchronized subset.
    pub fn synced(&self) -> ViewState {
        ViewState {
            background_color: self.background_color.clone(),
            font_family: self.font_family.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Batching,
    Flushing,
    Reconciling,
}

/// User-visible save indicator. Errors clear on their own after a short
/// interval and never block local editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    Saving,
    Error,
}

/// One debounced write, ready to be sent to the server.
#[derive(Debug, Clone)]
pub struct FlushRequest {
    pub snapshot: BoardSnapshot,
    pub known_version: u64,
}

/// What happened to an inbound broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Adopted: the local document now equals the broadcast payload.
    Applied,
    /// A write is in flight; the broadcast is held until it resolves.
    Buffered,
    /// Version at or below the local one; dropped.
    Stale,
}

const ERROR_CLEAR_AFTER: Duration = Duration::from_secs(4);

/// Keeps the remote-apply flag armed until dropped.
///
/// Editors apply forwarded updates asynchronously; dropping the flag when the
/// update is merely queued would let the editor's change callback slip through
/// as a local edit. Holding the token across the actual application closes
/// that window, and the drop guard still clears the flag if applying panics.
pub struct RemoteApplyToken {
    _reset: ScopeGuard<Box<dyn FnOnce() + Send>>,
}

impl RemoteApplyToken {
    fn arm(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self {
            _reset: ScopeGuard::new(Box::new(move || flag.store(false, Ordering::Release))),
        }
    }
}

/// Client-side sync state machine for one open board view.
///
/// Sans-IO: the caller owns the clock, the timer and the transport. Local
/// edits are debounced into a single pending write; inbound broadcasts are
/// applied by full replacement; a conflict response discards the pending
/// batch and adopts the authoritative state. The machine is single-threaded
/// and never produces two overlapping flushes.
pub struct SyncAgent {
    state: SyncState,
    /// Version of the last state this client observed.
    version: u64,
    /// Read-only cached copy of the last known document.
    document: BoardSnapshot,
    /// Local edits batched since the last flush.
    pending: Option<BoardSnapshot>,
    /// The snapshot currently in flight, kept for retry on transient failure.
    in_flight: Option<BoardSnapshot>,
    deadline: Option<Instant>,
    /// Latest broadcast received while a write was in flight.
    buffered_remote: Option<ElementsUpdatedMessage>,
    applying_remote: Arc<AtomicBool>,
    debounce: Duration,
    status: SaveStatus,
    error_since: Option<Instant>,
}

impl SyncAgent {
    pub fn new(document: BoardSnapshot, version: u64, debounce: Duration) -> Self {
        Self {
            state: SyncState::Idle,
            version,
            document,
            pending: None,
            in_flight: None,
            deadline: None,
            buffered_remote: None,
            applying_remote: Arc::new(AtomicBool::new(false)),
            debounce,
            status: SaveStatus::Saved,
            error_since: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn document(&self) -> &BoardSnapshot {
        &self.document
    }

    pub fn save_status(&self, now: Instant) -> SaveStatus {
        match (self.status, self.error_since) {
            (SaveStatus::Error, Some(since)) if now.duration_since(since) >= ERROR_CLEAR_AFTER => {
                SaveStatus::Saved
            }
            (status, _) => status,
        }
    }

    /// The instant the current batch becomes flushable, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_applying_remote(&self) -> bool {
        self.applying_remote.load(Ordering::Acquire)
    }

    /// Arm the remote-apply flag for the lifetime of the returned token.
    /// The token travels with the forwarded update to whoever pushes it into
    /// the editor, so the flag stays set until the new contents have actually
    /// been applied, however that task is scheduled. The token owns its flag
    /// handle; the agent stays free for `&mut` calls.
    pub fn remote_apply_token(&self) -> RemoteApplyToken {
        RemoteApplyToken::arm(self.applying_remote.clone())
    }

    /// Record a local edit. Restarts the debounce window; bursts of rapid
    /// edits collapse into one pending write. Returns false when the edit
    /// was suppressed because a remote update is being applied.
    pub fn note_local_edit(
        &mut self,
        elements: Vec<serde_json::Value>,
        view: &EditorViewState,
        files: BTreeMap<String, FileBlob>,
        now: Instant,
    ) -> bool {
        if self.is_applying_remote() {
            debug!("Local edit suppressed: remote update being applied");
            return false;
        }

        self.pending = Some(BoardSnapshot {
            elements,
            view_state: view.synced(),
            files,
        });
        self.deadline = Some(now + self.debounce);
        if self.state == SyncState::Idle {
            self.state = SyncState::Batching;
        }
        true
    }

    /// Produce the flush for the current batch once the debounce window has
    /// elapsed. At most one write is ever in flight.
    pub fn poll_flush(&mut self, now: Instant) -> Option<FlushRequest> {
        if self.state != SyncState::Batching {
            return None;
        }
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        let snapshot = self.pending.take()?;
        self.deadline = None;
        self.state = SyncState::Flushing;
        self.status = SaveStatus::Saving;
        self.in_flight = Some(snapshot.clone());
        Some(FlushRequest {
            snapshot,
            known_version: self.version,
        })
    }

    /// The in-flight write was accepted at `new_version`.
    ///
    /// Returns the buffered broadcast that superseded the accepted write, if
    /// one arrived mid-flight; the caller must push it into the editor, or
    /// the screen keeps showing the flushed content while the agent tracks
    /// the newer version.
    #[must_use = "an adopted broadcast must be applied to the editor"]
    pub fn on_flush_success(
        &mut self,
        new_version: u64,
        now: Instant,
    ) -> Option<ElementsUpdatedMessage> {
        if let Some(flushed) = self.in_flight.take() {
            self.document = flushed;
        }
        self.version = new_version;
        self.status = SaveStatus::Saved;
        self.state = SyncState::Idle;
        let adopted = self.drain_buffered_remote();
        self.resume_batching(now);
        adopted
    }

    /// The in-flight write was rejected as stale: discard the pending batch
    /// entirely and adopt the authoritative state. Discarded edits are not
    /// replayed. A conflict is a normal outcome, not an error.
    ///
    /// Returns a buffered broadcast newer than the conflict snapshot, if one
    /// arrived mid-flight; when present it, not the conflict snapshot, is
    /// what the editor must end up showing.
    #[must_use = "an adopted broadcast must be applied to the editor"]
    pub fn on_flush_conflict(
        &mut self,
        current: BoardSnapshot,
        current_version: u64,
    ) -> Option<ElementsUpdatedMessage> {
        self.state = SyncState::Reconciling;
        self.in_flight = None;
        self.pending = None;
        self.deadline = None;
        self.document = current;
        self.version = current_version;
        self.status = SaveStatus::Saved;
        let adopted = self.drain_buffered_remote();
        self.state = SyncState::Idle;
        debug!("Reconciled to authoritative version {}", self.version);
        adopted
    }

    /// The in-flight write failed before reaching the server or persistence
    /// failed: state on the server is unchanged, so retry the same batch
    /// with the same known version after another debounce window.
    pub fn on_flush_error(&mut self, now: Instant) {
        if let Some(flushed) = self.in_flight.take() {
            // Edits made during the flight already supersede the failed
            // batch; only restore it when nothing newer exists.
            if self.pending.is_none() {
                self.pending = Some(flushed);
            }
        }
        self.state = SyncState::Batching;
        self.deadline = Some(now + self.debounce);
        self.status = SaveStatus::Error;
        self.error_since = Some(now);
    }

    /// Handle an inbound broadcast. Applied immediately by full replacement
    /// unless a write is in flight, in which case it is buffered so its base
    /// is not superseded by our own pending response.
    pub fn on_remote_update(&mut self, msg: ElementsUpdatedMessage) -> RemoteOutcome {
        if msg.version <= self.version {
            return RemoteOutcome::Stale;
        }
        if self.state == SyncState::Flushing {
            let keep = match &self.buffered_remote {
                Some(held) => msg.version > held.version,
                None => true,
            };
            if keep {
                self.buffered_remote = Some(msg);
            }
            return RemoteOutcome::Buffered;
        }

        self.adopt_remote(msg);
        RemoteOutcome::Applied
    }

    /// Adopt an authoritative snapshot fetched after a reconnect. Any local
    /// batch predating the disconnect is discarded along with it.
    pub fn on_resync(&mut self, snapshot: BoardSnapshot, version: u64) {
        if version <= self.version {
            return;
        }
        self.document = snapshot;
        self.version = version;
        self.pending = None;
        self.deadline = None;
        if self.state == SyncState::Batching {
            self.state = SyncState::Idle;
        }
    }

    fn adopt_remote(&mut self, msg: ElementsUpdatedMessage) {
        self.version = msg.version;
        self.document = BoardSnapshot {
            elements: msg.elements,
            view_state: msg.view_state,
            files: msg.files,
        };
    }

    fn drain_buffered_remote(&mut self) -> Option<ElementsUpdatedMessage> {
        let msg = self.buffered_remote.take()?;
        if msg.version > self.version {
            self.adopt_remote(msg.clone());
            return Some(msg);
        }
        None
    }

    fn resume_batching(&mut self, now: Instant) {
        if self.pending.is_some() {
            self.state = SyncState::Batching;
            if self.deadline.is_none() {
                self.deadline = Some(now + self.debounce);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> SyncAgent {
        SyncAgent::new(BoardSnapshot::default(), 0, Duration::from_millis(300))
    }

    fn elements(label: &str) -> Vec<serde_json::Value> {
        vec![serde_json::json!({ "id": label })]
    }

    fn update(version: u64, label: &str) -> ElementsUpdatedMessage {
        ElementsUpdatedMessage {
            version,
            elements: elements(label),
            view_state: ViewState::default(),
            files: BTreeMap::new(),
            updated_by: "peer".to_string(),
        }
    }

    #[test]
    fn rapid_edits_collapse_into_one_flush() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("a"), &view, BTreeMap::new(), t0);
        agent.note_local_edit(elements("b"), &view, BTreeMap::new(), t0 + Duration::from_millis(50));
        agent.note_local_edit(elements("c"), &view, BTreeMap::new(), t0 + Duration::from_millis(100));

        // Window has not elapsed since the last edit.
        assert!(agent.poll_flush(t0 + Duration::from_millis(200)).is_none());

        let request = agent
            .poll_flush(t0 + Duration::from_millis(401))
            .expect("batch should flush");
        assert_eq!(request.known_version, 0);
        assert_eq!(request.snapshot.elements, elements("c"));
        assert_eq!(agent.state(), SyncState::Flushing);

        // Exactly one flush for the burst.
        assert!(agent.poll_flush(t0 + Duration::from_secs(10)).is_none());

        assert!(agent.on_flush_success(1, t0 + Duration::from_millis(450)).is_none());
        assert_eq!(agent.version(), 1);
        assert_eq!(agent.state(), SyncState::Idle);
        assert_eq!(agent.document().elements, elements("c"));
    }

    #[test]
    fn conflict_discards_batch_and_adopts_authoritative_state() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("mine"), &view, BTreeMap::new(), t0);
        agent.poll_flush(t0 + Duration::from_millis(301)).unwrap();

        let mut authoritative = BoardSnapshot::default();
        authoritative.elements = elements("theirs");
        assert!(agent.on_flush_conflict(authoritative, 6).is_none());

        assert_eq!(agent.state(), SyncState::Idle);
        assert_eq!(agent.version(), 6);
        assert_eq!(agent.document().elements, elements("theirs"));
        // The discarded batch is not replayed.
        assert!(agent.poll_flush(t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn remote_update_is_buffered_while_flushing() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("mine"), &view, BTreeMap::new(), t0);
        agent.poll_flush(t0 + Duration::from_millis(301)).unwrap();

        assert_eq!(agent.on_remote_update(update(1, "peer")), RemoteOutcome::Buffered);
        // Our own write resolved first at version 1; the buffered version 1
        // is then stale and must not clobber it or reach the editor.
        assert!(agent.on_flush_success(1, t0 + Duration::from_millis(400)).is_none());
        assert_eq!(agent.version(), 1);
        assert_eq!(agent.document().elements, elements("mine"));
    }

    #[test]
    fn buffered_newer_remote_applies_after_flush_resolves() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("mine"), &view, BTreeMap::new(), t0);
        agent.poll_flush(t0 + Duration::from_millis(301)).unwrap();

        agent.on_remote_update(update(2, "peer"));
        let adopted = agent
            .on_flush_success(1, t0 + Duration::from_millis(400))
            .expect("buffered broadcast must surface");
        assert_eq!(adopted.version, 2);

        assert_eq!(agent.version(), 2);
        assert_eq!(agent.document().elements, elements("peer"));
    }

    #[test]
    fn adopted_buffered_remote_is_returned_for_rendering() {
        let mut agent = SyncAgent::new(BoardSnapshot::default(), 5, Duration::from_millis(300));
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("mine"), &view, BTreeMap::new(), t0);
        agent.poll_flush(t0 + Duration::from_millis(301)).unwrap();

        // A peer lands version 7 while our write is in flight.
        assert_eq!(agent.on_remote_update(update(7, "peer")), RemoteOutcome::Buffered);

        // Our write is accepted at 6; the agent adopts the newer broadcast
        // and hands it back so the editor ends up showing it too. Dropping
        // the return here would leave the screen on "mine" while the next
        // flush proposes from version 7, erasing the peer's write.
        let adopted = agent
            .on_flush_success(6, t0 + Duration::from_millis(400))
            .expect("adopted broadcast must be handed to the editor");
        assert_eq!(adopted.version, 7);
        assert_eq!(adopted.elements, elements("peer"));
        assert_eq!(agent.version(), 7);
        assert_eq!(agent.document().elements, elements("peer"));
        assert!(agent.poll_flush(t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn stale_remote_update_is_a_noop() {
        let mut agent = agent();
        assert_eq!(agent.on_remote_update(update(3, "x")), RemoteOutcome::Applied);
        assert_eq!(agent.version(), 3);

        assert_eq!(agent.on_remote_update(update(3, "y")), RemoteOutcome::Stale);
        assert_eq!(agent.on_remote_update(update(2, "z")), RemoteOutcome::Stale);
        assert_eq!(agent.document().elements, elements("x"));
    }

    #[test]
    fn remote_guard_suppresses_feedback_edits() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        assert_eq!(agent.on_remote_update(update(1, "peer")), RemoteOutcome::Applied);

        {
            // The editor change callback fires while the broadcast is being
            // rendered; it must not start a new batch.
            let _token = agent.remote_apply_token();
            assert!(agent.is_applying_remote());
            assert!(!agent.note_local_edit(elements("echo"), &view, BTreeMap::new(), t0));
            assert_eq!(agent.state(), SyncState::Idle);
        }
        assert!(!agent.is_applying_remote());

        // Outside the guard, edits register normally.
        assert!(agent.note_local_edit(elements("a"), &view, BTreeMap::new(), t0));
        assert_eq!(agent.state(), SyncState::Batching);
    }

    #[test]
    fn transient_failure_retries_with_same_known_version() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("a"), &view, BTreeMap::new(), t0);
        let first = agent.poll_flush(t0 + Duration::from_millis(301)).unwrap();
        assert_eq!(first.known_version, 0);

        let fail_at = t0 + Duration::from_millis(400);
        agent.on_flush_error(fail_at);
        assert_eq!(agent.save_status(fail_at), SaveStatus::Error);

        let retry = agent
            .poll_flush(fail_at + Duration::from_millis(301))
            .expect("failed batch should be retried");
        assert_eq!(retry.known_version, 0);
        assert_eq!(retry.snapshot.elements, elements("a"));

        // The error indicator clears on its own.
        assert_eq!(
            agent.save_status(fail_at + Duration::from_secs(5)),
            SaveStatus::Saved
        );
    }

    #[test]
    fn edits_during_flight_become_the_next_batch() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("first"), &view, BTreeMap::new(), t0);
        agent.poll_flush(t0 + Duration::from_millis(301)).unwrap();

        let mid_flight = t0 + Duration::from_millis(350);
        agent.note_local_edit(elements("second"), &view, BTreeMap::new(), mid_flight);
        // Still flushing: no second write may start.
        assert!(agent.poll_flush(mid_flight + Duration::from_secs(1)).is_none());

        assert!(agent.on_flush_success(1, t0 + Duration::from_millis(400)).is_none());
        assert_eq!(agent.state(), SyncState::Batching);

        let next = agent
            .poll_flush(t0 + Duration::from_millis(700))
            .expect("mid-flight edits flush after resolution");
        assert_eq!(next.known_version, 1);
        assert_eq!(next.snapshot.elements, elements("second"));
    }

    #[test]
    fn resync_adopts_newer_state_and_drops_the_batch() {
        let mut agent = agent();
        let view = EditorViewState::default();
        let t0 = Instant::now();

        agent.note_local_edit(elements("local"), &view, BTreeMap::new(), t0);

        let mut fetched = BoardSnapshot::default();
        fetched.elements = elements("server");
        agent.on_resync(fetched, 9);

        assert_eq!(agent.version(), 9);
        assert_eq!(agent.state(), SyncState::Idle);
        assert!(agent.poll_flush(t0 + Duration::from_secs(10)).is_none());

        // A resync at or below the local version changes nothing.
        agent.on_resync(BoardSnapshot::default(), 9);
        assert_eq!(agent.document().elements, elements("server"));
    }

    #[test]
    fn camera_state_never_reaches_the_synced_view() {
        let view = EditorViewState {
            background_color: "#202020".to_string(),
            font_family: "mono".to_string(),
            zoom: 2.5,
            scroll_x: 840.0,
            scroll_y: -120.0,
        };
        let synced = view.synced();
        assert_eq!(synced.background_color, "#202020");
        assert_eq!(synced.font_family, "mono");
        let json = serde_json::to_value(&synced).unwrap();
        assert!(json.get("zoom").is_none());
        assert!(json.get("scrollX").is_none());
    }
}
