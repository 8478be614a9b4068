//! Two-party WebRTC signaling relay
//!
//! Two participants meet in a short-lived, named session and exchange
//! negotiation messages (offers, answers, ICE candidates) through the server.
//! The server never looks inside those messages and never carries media.
//!
//! # Protocol
//!
//! - **POST /rooms** - Pre-create a session, returns `{"sessionId", "ttlSeconds"}`
//! - **GET /health** - Status probe with the live session count
//! - **GET /ws?roomId={id}&role={role}** - Join a session over WebSocket
//!
//! ## Server → client
//!
//! - `{"type":"hello","sessionId","participantId","role","createdAt","members"}`
//! - `{"type":"member.joined","sessionId","participantId","role"}`
//! - `{"type":"member.left","sessionId","participantId"}`
//! - `{"type":"offer"|"answer"|"ice","sessionId","from","payload"}` - Relayed from the peer
//! - `{"type":"pong","t"}` / `{"type":"ping","t"}`
//! - `{"type":"error","code":"bad_json"|"unsupported_type"}`
//!
//! ## Client → server
//!
//! - `{"type":"offer"|"answer"|"ice","payload":...}` - Forwarded to the other participant
//! - `{"type":"ping"}`
//!
//! A session admits at most two participants and expires after its TTL
//! (10 minutes by default), at which point remaining connections are closed
//! with code 4000 and reason `expired`.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! duet-signaling --port 8080
//!
//! # Create a session
//! curl -X POST -d '{"sessionId":"abcd"}' http://127.0.0.1:8080/rooms
//!
//! # Join it
//! websocat "ws://127.0.0.1:8080/ws?roomId=ABCD&role=caller"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod state;
pub mod sweeper;

pub use config::ServerConfig;
pub use error::SignalingError;
pub use handler::{AppState, router};
pub use server::Server;
pub use state::{ServerState, SessionSnapshot};
