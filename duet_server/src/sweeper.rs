//! Periodic eviction of sessions that outlived their TTL.

use crate::state::ServerState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn the sweeper; it runs until `shutdown` is cancelled
pub fn spawn(state: ServerState, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = state.sweep_expired(Instant::now());
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), remaining = state.count(), "swept expired sessions");
                    }
                }
            }
        }
    })
}
