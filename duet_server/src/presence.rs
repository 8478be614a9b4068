//! Join/leave notifications fanned out to a session's members.

use crate::protocol::{ServerMessage, SessionId};
use crate::state::ServerState;
use tracing::debug;

/// Send `event` to every open connection in the session.
///
/// Closed or backed-up connections are skipped. Returns the number of
/// connections that accepted the frame.
pub fn announce(state: &ServerState, session_id: &SessionId, event: &ServerMessage) -> usize {
    let Some(frame) = event.to_frame() else {
        return 0;
    };
    let recipients = state.open_handles(session_id);
    let total = recipients.len();
    let delivered = recipients
        .iter()
        .filter(|handle| handle.send(frame.clone()))
        .count();
    if delivered < total {
        debug!(%session_id, dropped = total - delivered, "presence event dropped");
    }
    delivered
}
