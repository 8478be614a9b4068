//! Session registry for the duet signaling server
//!
//! This module owns every live session and the participants admitted into
//! them. All mutation goes through [`ServerState`] so the two-member limit
//! and the "no empty sessions" rule are enforced in one place.

use crate::error::AdmissionError;
use crate::protocol::{ParticipantId, Role, ServerMessage, SessionId, now_millis};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Maximum participants per session
pub const MAX_MEMBERS: usize = 2;

/// Outbound frames buffered per connection before new ones are dropped
pub const OUTBOUND_BUFFER: usize = 64;

/// Sending side of a participant connection.
///
/// Frames go through a bounded channel drained by the connection task, which
/// keeps writes to one socket in order. The eviction token is cancelled by the
/// sweeper to force the connection closed.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<Arc<str>>,
    evicted: CancellationToken,
}

impl PeerHandle {
    /// Create a handle and the receiver the connection task drains
    pub fn channel() -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let handle = Self {
            tx,
            evicted: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Best-effort send; returns false when the frame was dropped
    pub fn send(&self, frame: Arc<str>) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed() && !self.evicted.is_cancelled()
    }

    /// Ask the connection task to close with the expiry reason
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    pub fn eviction(&self) -> CancellationToken {
        self.evicted.clone()
    }
}

#[derive(Debug)]
struct Member {
    id: ParticipantId,
    handle: PeerHandle,
}

#[derive(Debug)]
struct Session {
    created_at: Instant,
    created_at_ms: i64,
    /// Join order is kept for diagnostics only
    members: Vec<Member>,
}

impl Session {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            created_at_ms: now_millis(),
            members: Vec::with_capacity(MAX_MEMBERS),
        }
    }

    fn snapshot(&self, session_id: &SessionId) -> SessionSnapshot {
        SessionSnapshot {
            session_id: session_id.clone(),
            created_at: self.created_at_ms,
            members: self.members.iter().map(|m| m.id).collect(),
        }
    }
}

/// Read-only view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    /// Unix epoch milliseconds
    pub created_at: i64,
    pub members: Vec<ParticipantId>,
}

/// Result of a successful admission
#[derive(Debug, Clone)]
pub struct Admission {
    pub participant_id: ParticipantId,
    /// Session state right after the insert, including the new member
    pub snapshot: SessionSnapshot,
}

/// Shared handle to the session registry
#[derive(Debug, Clone)]
pub struct ServerState {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    ttl: Duration,
}

impl ServerState {
    /// Create an empty registry whose sessions live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the session for `session_id`, creating it if needed
    pub fn ensure(&self, session_id: &SessionId) -> SessionSnapshot {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                debug!(%session_id, "session created");
                Session::new()
            })
            .snapshot(session_id)
    }

    /// Create a session under a fresh server-generated identifier
    pub fn ensure_generated(&self) -> SessionSnapshot {
        let mut sessions = self.sessions.lock();
        let session_id = loop {
            let candidate = SessionId::generate();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        debug!(%session_id, "session created");
        sessions
            .entry(session_id.clone())
            .or_insert_with(Session::new)
            .snapshot(&session_id)
    }

    /// Admit a connection into `session_id`.
    ///
    /// The capacity check and the insert happen under one lock, so concurrent
    /// admissions can never push a session past [`MAX_MEMBERS`]. A rejected
    /// admission leaves the registry untouched.
    ///
    /// The `hello` frame is queued on `handle` before the member becomes
    /// visible to relays, broadcasts and heartbeats, so it is always the first
    /// frame the connection receives.
    pub fn admit(
        &self,
        session_id: &SessionId,
        role: Role,
        handle: PeerHandle,
    ) -> Result<Admission, AdmissionError> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(session_id)
            && session.members.len() >= MAX_MEMBERS
        {
            return Err(AdmissionError::SessionFull);
        }

        let session = sessions.entry(session_id.clone()).or_insert_with(|| {
            debug!(%session_id, "session created on connect");
            Session::new()
        });
        let participant_id = ParticipantId::new();
        let mut snapshot = session.snapshot(session_id);
        snapshot.members.push(participant_id);

        let hello = ServerMessage::Hello {
            session_id: session_id.clone(),
            participant_id,
            role,
            created_at: snapshot.created_at,
            members: snapshot.members.clone(),
        };
        if !hello.to_frame().is_some_and(|frame| handle.send(frame)) {
            debug!(%session_id, %participant_id, "hello dropped");
        }
        session.members.push(Member {
            id: participant_id,
            handle,
        });

        Ok(Admission {
            participant_id,
            snapshot,
        })
    }

    /// Remove a participant; the session goes with its last member.
    ///
    /// Returns false when the participant was not registered, e.g. because the
    /// sweeper already dropped the whole session.
    pub fn remove(&self, session_id: &SessionId, participant_id: ParticipantId) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        let before = session.members.len();
        session.members.retain(|m| m.id != participant_id);
        let removed = session.members.len() != before;

        if removed && session.members.is_empty() {
            let _ = sessions.remove(session_id);
            debug!(%session_id, "session closed");
        }
        removed
    }

    pub fn snapshot(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        let sessions = self.sessions.lock();
        sessions.get(session_id).map(|s| s.snapshot(session_id))
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// The other member of the session, if it is still connected
    pub fn peer_of(&self, session_id: &SessionId, participant_id: ParticipantId) -> Option<PeerHandle> {
        let sessions = self.sessions.lock();
        sessions
            .get(session_id)?
            .members
            .iter()
            .find(|m| m.id != participant_id && m.handle.is_open())
            .map(|m| m.handle.clone())
    }

    /// Open connections of every member of a session
    pub fn open_handles(&self, session_id: &SessionId) -> Vec<PeerHandle> {
        let sessions = self.sessions.lock();
        sessions
            .get(session_id)
            .map(|s| open_handles(&s.members))
            .unwrap_or_default()
    }

    /// Open connections across all sessions
    pub fn all_open_handles(&self) -> Vec<PeerHandle> {
        let sessions = self.sessions.lock();
        sessions
            .values()
            .flat_map(|s| open_handles(&s.members))
            .collect()
    }

    /// Evict every session older than the TTL at `now`.
    ///
    /// Members are signalled to close and the session is dropped in the same
    /// lock scope, so a new connection under the same identifier always gets
    /// a fresh session.
    pub fn sweep_expired(&self, now: Instant) -> Vec<SessionId> {
        let mut sessions = self.sessions.lock();
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.created_at) > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            if let Some(session) = sessions.remove(session_id) {
                for member in &session.members {
                    member.handle.evict();
                }
                info!(
                    %session_id,
                    members = session.members.len(),
                    "session expired"
                );
            }
        }
        expired
    }
}

fn open_handles(members: &[Member]) -> Vec<PeerHandle> {
    members
        .iter()
        .filter(|m| m.handle.is_open())
        .map(|m| m.handle.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn handle() -> (PeerHandle, mpsc::Receiver<Arc<str>>) {
        PeerHandle::channel()
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let state = ServerState::new(TTL);
        let first = state.ensure(&sid("abcd"));
        let second = state.ensure(&sid("ABCD"));
        assert_eq!(first, second);
        assert_eq!(state.count(), 1);
        assert!(first.members.is_empty());
    }

    #[tokio::test]
    async fn ensure_generated_creates_distinct_sessions() {
        let state = ServerState::new(TTL);
        let a = state.ensure_generated();
        let b = state.ensure_generated();
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(state.count(), 2);
    }

    #[tokio::test]
    async fn admit_returns_snapshot_with_all_members() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        let first = state.admit(&sid("r"), Role::Caller, h1).unwrap();
        assert_eq!(first.snapshot.members, vec![first.participant_id]);

        let second = state.admit(&sid("r"), Role::Callee, h2).unwrap();
        assert_eq!(
            second.snapshot.members,
            vec![first.participant_id, second.participant_id]
        );
        assert_eq!(first.snapshot.created_at, second.snapshot.created_at);
        assert_eq!(state.snapshot(&sid("r")).unwrap(), second.snapshot);
    }

    fn next_value(rx: &mut mpsc::Receiver<Arc<str>>) -> serde_json::Value {
        let frame = rx.try_recv().expect("expected a frame");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn hello_is_queued_before_the_member_is_reachable() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let (h2, mut rx2) = handle();
        let first = state.admit(&sid("r"), Role::Caller, h1).unwrap();
        let second = state.admit(&sid("r"), Role::Callee, h2).unwrap();

        // Anything routed to the newcomer right after admission lands behind hello
        let peer = state.peer_of(&sid("r"), first.participant_id).unwrap();
        assert!(peer.send(Arc::from(r#"{"type":"offer"}"#)));
        for open in state.all_open_handles() {
            let _ = open.send(Arc::from(r#"{"type":"ping"}"#));
        }

        let hello = next_value(&mut rx2);
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["sessionId"], "R");
        assert_eq!(hello["participantId"], second.participant_id.to_string());
        assert_eq!(hello["role"], "callee");
        assert_eq!(hello["createdAt"], first.snapshot.created_at);
        assert_eq!(
            hello["members"],
            serde_json::json!([
                first.participant_id.to_string(),
                second.participant_id.to_string()
            ])
        );
        assert_eq!(next_value(&mut rx2)["type"], "offer");
        assert_eq!(next_value(&mut rx2)["type"], "ping");
    }

    #[tokio::test]
    async fn rejected_admission_queues_nothing() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let (h3, mut rx3) = handle();
        let _ = state.admit(&sid("r"), Role::Caller, h1).unwrap();
        let _ = state.admit(&sid("r"), Role::Callee, h2).unwrap();

        assert!(state.admit(&sid("r"), Role::Guest, h3).is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn third_admission_is_rejected_without_mutation() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let (h3, _rx3) = handle();
        let _ = state.admit(&sid("r"), Role::Caller, h1).unwrap();
        let _ = state.admit(&sid("r"), Role::Callee, h2).unwrap();
        let before = state.snapshot(&sid("r")).unwrap();

        let err = state.admit(&sid("r"), Role::Guest, h3).unwrap_err();
        assert_eq!(err, AdmissionError::SessionFull);
        assert_eq!(state.snapshot(&sid("r")).unwrap(), before);
    }

    #[tokio::test]
    async fn concurrent_admissions_never_exceed_two() {
        let state = ServerState::new(TTL);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                let (h, rx) = PeerHandle::channel();
                (state.admit(&sid("race"), Role::Guest, h).is_ok(), rx)
            }));
        }
        let mut admitted = 0;
        let mut receivers = Vec::new();
        for task in tasks {
            let (ok, rx) = task.await.unwrap();
            admitted += usize::from(ok);
            receivers.push(rx);
        }
        assert_eq!(admitted, 2);
        assert_eq!(state.snapshot(&sid("race")).unwrap().members.len(), 2);
    }

    #[tokio::test]
    async fn session_disappears_with_last_member() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let a = state.admit(&sid("r"), Role::Caller, h1).unwrap();
        let b = state.admit(&sid("r"), Role::Callee, h2).unwrap();

        assert!(state.remove(&sid("r"), a.participant_id));
        assert_eq!(state.snapshot(&sid("r")).unwrap().members, vec![b.participant_id]);

        assert!(state.remove(&sid("r"), b.participant_id));
        assert!(state.snapshot(&sid("r")).is_none());
        assert_eq!(state.count(), 0);

        // Second cleanup for the same participant is a no-op
        assert!(!state.remove(&sid("r"), b.participant_id));
        assert_eq!(state.count(), 0);
    }

    #[tokio::test]
    async fn rejoining_after_close_creates_a_new_session() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let a = state.admit(&sid("r"), Role::Caller, h1).unwrap();
        assert!(state.remove(&sid("r"), a.participant_id));

        let (h2, _rx2) = handle();
        let b = state.admit(&sid("r"), Role::Caller, h2).unwrap();
        assert_ne!(a.participant_id, b.participant_id);
        assert_eq!(b.snapshot.members, vec![b.participant_id]);
    }

    #[tokio::test]
    async fn peer_of_skips_sender_and_closed_connections() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let (h2, rx2) = handle();
        let a = state.admit(&sid("r"), Role::Caller, h1).unwrap();
        assert!(state.peer_of(&sid("r"), a.participant_id).is_none());

        let _ = state.admit(&sid("r"), Role::Callee, h2).unwrap();
        assert!(state.peer_of(&sid("r"), a.participant_id).is_some());

        drop(rx2);
        assert!(state.peer_of(&sid("r"), a.participant_id).is_none());
        assert_eq!(state.open_handles(&sid("r")).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired_sessions() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let token = h1.eviction();
        let _ = state.admit(&sid("old"), Role::Caller, h1).unwrap();

        tokio::time::advance(TTL).await;
        let (h2, _rx2) = handle();
        let fresh = h2.eviction();
        let _ = state.admit(&sid("new"), Role::Caller, h2).unwrap();

        // Age equal to the TTL is not yet expired
        assert!(state.sweep_expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let evicted = state.sweep_expired(Instant::now());
        assert_eq!(evicted, vec![sid("old")]);
        assert!(token.is_cancelled());
        assert!(!fresh.is_cancelled());
        assert!(state.snapshot(&sid("old")).is_none());
        assert!(state.snapshot(&sid("new")).is_some());
    }

    #[tokio::test]
    async fn sweep_removes_empty_precreated_sessions() {
        let state = ServerState::new(TTL);
        let _ = state.ensure(&sid("idle"));
        let evicted = state.sweep_expired(Instant::now() + TTL + Duration::from_millis(1));
        assert_eq!(evicted, vec![sid("idle")]);
        assert_eq!(state.count(), 0);
    }

    #[tokio::test]
    async fn all_open_handles_spans_sessions() {
        let state = ServerState::new(TTL);
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let _ = state.admit(&sid("a"), Role::Caller, h1).unwrap();
        let _ = state.admit(&sid("b"), Role::Caller, h2).unwrap();
        assert_eq!(state.all_open_handles().len(), 2);
    }
}
