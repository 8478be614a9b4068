//! Server configuration from command-line flags and environment variables

use crate::error::SignalingError;
use clap::Parser;
use std::time::Duration;

/// Configuration for the signaling server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "duet-signaling")]
#[command(version)]
#[command(about = "Two-party signaling relay for WebRTC connection negotiation")]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Comma separated list of allowed CORS origins, `*` for any
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// Session time-to-live in seconds
    #[arg(long, env = "ROOM_TTL_SECS", default_value_t = 600)]
    pub room_ttl_secs: u64,

    /// Seconds between expiry sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Seconds between server pings to every connection
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Maximum concurrent participant connections
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 1024)]
    pub max_connections: usize,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            room_ttl_secs: 600,
            sweep_interval_secs: 60,
            heartbeat_interval_secs: 30,
            max_connections: 1024,
            verbose: false,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), SignalingError> {
        if self.room_ttl_secs == 0 {
            return Err(SignalingError::Config("room TTL must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(SignalingError::Config(
                "sweep interval must be positive".into(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(SignalingError::Config(
                "heartbeat interval must be positive".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(SignalingError::Config(
                "max connections must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// True when any origin may connect
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o.trim() == "*")
    }
}
