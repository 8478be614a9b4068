//! Relay engine: routes one inbound frame from a participant.
//!
//! Whitelisted negotiation messages go to the other member of the session,
//! `ping` is answered directly, and everything else is refused. Payloads are
//! never inspected and leave exactly as they arrived.

use crate::error::ClientRequestError;
use crate::protocol::{
    ClientMessage, ParticipantId, Relayed, ServerMessage, SessionId, now_millis,
    parse_client_message,
};
use crate::state::{PeerHandle, ServerState};
use tracing::{debug, warn};

/// What the engine did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Forwarded to the peer (delivery itself is best-effort)
    Forwarded,
    /// No open peer to forward to
    NoPeer,
    /// Answered the sender directly
    Replied,
    /// Error reply sent to the sender
    Rejected,
    /// Frame had no `type`
    Discarded,
}

/// Handle one text frame from `sender` in `session_id`.
///
/// `reply` is the sender's own connection.
pub fn handle(
    state: &ServerState,
    session_id: &SessionId,
    sender: ParticipantId,
    reply: &PeerHandle,
    text: &str,
) -> Outcome {
    let message = match parse_client_message(text) {
        Ok(Some(message)) => message,
        Ok(None) => {
            debug!(%session_id, participant_id = %sender, "discarding message without type");
            return Outcome::Discarded;
        }
        Err(e) => {
            warn!(%session_id, participant_id = %sender, error = %e, "rejecting client message");
            send(reply, &error_reply(&e));
            return Outcome::Rejected;
        }
    };

    match message {
        ClientMessage::Ping => {
            send(reply, &ServerMessage::Pong { t: now_millis() });
            Outcome::Replied
        }
        ClientMessage::Relay { kind, payload } => {
            let Some(peer) = state.peer_of(session_id, sender) else {
                debug!(%session_id, participant_id = %sender, ?kind, "no peer to relay to");
                return Outcome::NoPeer;
            };
            let envelope = Relayed {
                session_id: session_id.clone(),
                from: sender,
                payload,
            };
            let delivered = send(&peer, &ServerMessage::relayed(kind, envelope));
            debug!(%session_id, participant_id = %sender, ?kind, delivered, "relayed message");
            Outcome::Forwarded
        }
    }
}

fn error_reply(error: &ClientRequestError) -> ServerMessage {
    ServerMessage::Error { code: error.code() }
}

fn send(handle: &PeerHandle, message: &ServerMessage) -> bool {
    message.to_frame().is_some_and(|frame| handle.send(frame))
}
