//! Server-originated liveness pings.
//!
//! Independent of the client `ping`/`pong` exchange: every open connection
//! receives `{"type":"ping","t":..}` on a fixed interval.

use crate::protocol::{ServerMessage, now_millis};
use crate::state::ServerState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ping every open connection once; returns how many accepted the frame
pub fn ping_all(state: &ServerState) -> usize {
    let Some(frame) = (ServerMessage::Ping { t: now_millis() }).to_frame() else {
        return 0;
    };
    state
        .all_open_handles()
        .iter()
        .filter(|handle| handle.send(frame.clone()))
        .count()
}

/// Spawn the heartbeat; it runs until `shutdown` is cancelled
pub fn spawn(state: ServerState, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let sent = ping_all(&state);
                    debug!(sent, "heartbeat");
                }
            }
        }
    })
}
