//! Per-connection task: admission, message loop and cleanup.

use crate::error::AdmissionError;
use crate::presence;
use crate::protocol::{ParticipantId, Role, ServerMessage, SessionId};
use crate::relay;
use crate::state::{PeerHandle, ServerState};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Close code used when the sweeper evicts a session
pub const EXPIRED_CLOSE_CODE: u16 = 4000;

/// Close reason used when the sweeper evicts a session
pub const EXPIRED_CLOSE_REASON: &str = "expired";

/// Query parameters of the upgrade request
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "roomId", alias = "sessionId")]
    pub room_id: Option<String>,
    pub role: Option<String>,
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn reject(mut socket: WebSocket, error: AdmissionError) {
    let _ = socket
        .send(close_message(error.close_code(), error.close_reason()))
        .await;
}

/// Drive one participant connection until it closes or is evicted
pub async fn run(socket: WebSocket, state: ServerState, params: ConnectParams) {
    let Some(session_id) = params.room_id.as_deref().and_then(SessionId::parse) else {
        warn!(raw = ?params.room_id, "rejecting connection without session id");
        reject(socket, AdmissionError::MissingSessionId).await;
        return;
    };
    let role = Role::from_param(params.role.as_deref());

    let (handle, outbound) = PeerHandle::channel();
    let admission = match state.admit(&session_id, role, handle.clone()) {
        Ok(admission) => admission,
        Err(e) => {
            warn!(%session_id, %role, error = %e, "rejecting connection");
            reject(socket, e).await;
            return;
        }
    };
    let participant_id = admission.participant_id;
    info!(
        %session_id,
        %participant_id,
        %role,
        members = admission.snapshot.members.len(),
        "participant joined"
    );

    // `admit` already queued hello, so the announcement follows it
    let _ = presence::announce(
        &state,
        &session_id,
        &ServerMessage::MemberJoined {
            session_id: session_id.clone(),
            participant_id,
            role,
        },
    );

    let evicted = pump(socket, &state, &session_id, participant_id, &handle, outbound).await;

    // Cleanup runs once, after the loop has ended for whatever reason
    if state.remove(&session_id, participant_id) {
        info!(%session_id, %participant_id, "participant left");
        let _ = presence::announce(
            &state,
            &session_id,
            &ServerMessage::MemberLeft {
                session_id: session_id.clone(),
                participant_id,
            },
        );
    } else {
        info!(%session_id, %participant_id, evicted, "participant closed after eviction");
    }
}

/// Message loop. Inbound frames are handled one at a time in arrival order;
/// outbound frames are written in the order they were queued.
///
/// Returns true when the loop ended because the session was evicted.
async fn pump(
    socket: WebSocket,
    state: &ServerState,
    session_id: &SessionId,
    participant_id: ParticipantId,
    handle: &PeerHandle,
    mut outbound: mpsc::Receiver<Arc<str>>,
) -> bool {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let eviction = handle.eviction();
    let mut evicted = false;

    loop {
        tokio::select! {
            biased;

            () = eviction.cancelled() => {
                debug!(%session_id, %participant_id, "closing evicted connection");
                let _ = ws_tx
                    .send(close_message(EXPIRED_CLOSE_CODE, EXPIRED_CLOSE_REASON))
                    .await;
                evicted = true;
                break;
            }
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = relay::handle(state, session_id, participant_id, handle, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Binary frames are not part of the protocol; ping/pong is answered by axum
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%session_id, %participant_id, error = %e, "websocket error");
                    break;
                }
            },
            Some(frame) = outbound.recv() => {
                if ws_tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
    evicted
}
