//! Server bootstrap: background tasks plus the HTTP listener.

use crate::config::ServerConfig;
use crate::error::SignalingError;
use crate::handler::{self, AppState};
use crate::state::ServerState;
use crate::{heartbeat, sweeper};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A configured signaling server, ready to run on a listener
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self, SignalingError> {
        config.validate()?;
        let sessions = ServerState::new(config.room_ttl());
        let state = AppState::new(sessions, config.max_connections);
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// The sweeper and heartbeat run for as long as the listener does.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), SignalingError> {
        let sessions = self.state.sessions.clone();
        let sweeper = sweeper::spawn(
            sessions.clone(),
            self.config.sweep_interval(),
            shutdown.child_token(),
        );
        let heartbeat = heartbeat::spawn(
            sessions,
            self.config.heartbeat_interval(),
            shutdown.child_token(),
        );

        let app = handler::router(self.state, &self.config);
        info!(
            addr = %listener.local_addr()?,
            ttl_secs = self.config.room_ttl_secs,
            "signaling server listening"
        );

        let graceful = shutdown.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;

        shutdown.cancel();
        let _ = sweeper.await;
        let _ = heartbeat.await;
        info!("signaling server stopped");
        result.map_err(SignalingError::from)
    }
}
