//! HTTP handlers for the duet signaling server
//!
//! Session pre-creation, the status probe, and the WebSocket upgrade that
//! hands a participant connection to [`crate::connection`].

use crate::config::ServerConfig;
use crate::connection::{self, ConnectParams};
use crate::error::ApiError;
use crate::protocol::SessionId;
use crate::state::ServerState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State, ws::WebSocketUpgrade},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: ServerState,
    connection_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(sessions: ServerState, max_connections: usize) -> Self {
        Self {
            sessions,
            connection_slots: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Connection slots still free
    pub fn available_connections(&self) -> usize {
        self.connection_slots.available_permits()
    }
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default, rename = "sessionId", alias = "roomId")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: SessionId,
    ttl_seconds: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
    sessions: usize,
}

/// Build the application router
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/rooms", post(create_session))
        .route("/ws", get(connect))
        .fallback(not_found)
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(86400));

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Status probe
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.count(),
    })
}

/// Pre-create a session, optionally under a client-chosen identifier
async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| ApiError::BadJson)?
    };

    let snapshot = match request.session_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let session_id = SessionId::parse(raw).ok_or(ApiError::InvalidSessionId)?;
            state.sessions.ensure(&session_id)
        }
        _ => state.sessions.ensure_generated(),
    };
    info!(session_id = %snapshot.session_id, "session requested");

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: snapshot.session_id,
            ttl_seconds: state.sessions.ttl().as_secs(),
        }),
    ))
}

/// Upgrade into a participant connection
async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let Ok(permit) = Arc::clone(&state.connection_slots).try_acquire_owned() else {
        warn!("connection limit reached");
        return ApiError::TooManyConnections.into_response();
    };
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| async move {
        connection::run(socket, sessions, params).await;
        drop(permit);
    })
}

async fn index() -> &'static str {
    "Duet Signaling Server\n\
     \n\
     Endpoints:\n\
     - GET /health - Status probe\n\
     - POST /rooms - Create a session, body {\"sessionId\"?: string}\n\
     - GET /ws?roomId={id}&role={caller|callee|guest} - Join a session (WebSocket)\n\
     \n\
     Protocol:\n\
     1. Connect to /ws and receive {\"type\":\"hello\", ...}\n\
     2. Send {\"type\":\"offer\"|\"answer\"|\"ice\", \"payload\": ...} to reach the other participant\n\
     3. Send {\"type\":\"ping\"} to receive {\"type\":\"pong\", \"t\": ...}\n"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_state() -> AppState {
        AppState::new(ServerState::new(Duration::from_secs(600)), 4)
    }

    #[tokio::test]
    async fn health_reports_session_count() {
        let state = app_state();
        let _ = state.sessions.ensure(&SessionId::parse("abcd").unwrap());
        let Json(health) = health(State(state)).await;
        assert!(health.ok);
        assert_eq!(health.sessions, 1);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn create_session_normalizes_client_id() {
        let state = app_state();
        let body = Bytes::from_static(br#"{"sessionId":" abcd "}"#);
        let (status, Json(response)) = create_session(State(state.clone()), body).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response.session_id.as_str(), "ABCD");
        assert_eq!(response.ttl_seconds, 600);
        assert!(state.sessions.snapshot(&response.session_id).is_some());
    }

    #[tokio::test]
    async fn create_session_generates_id_for_empty_body() {
        let state = app_state();
        let (_, Json(response)) = create_session(State(state.clone()), Bytes::new()).await.unwrap();
        assert_eq!(response.session_id.as_str().len(), 6);
        assert_eq!(state.sessions.count(), 1);

        let body = Bytes::from_static(b"{}");
        let _ = create_session(State(state.clone()), body).await.unwrap();
        assert_eq!(state.sessions.count(), 2);
    }

    #[tokio::test]
    async fn create_session_rejects_bad_input() {
        let state = app_state();
        let err = create_session(State(state.clone()), Bytes::from_static(b"nope"))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::BadJson);

        let err = create_session(State(state.clone()), Bytes::from_static(br#"{"roomId":"a b"}"#))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::InvalidSessionId);
        assert_eq!(state.sessions.count(), 0);
    }

    #[test]
    fn connection_slots_follow_config() {
        let state = app_state();
        assert_eq!(state.available_connections(), 4);
    }
}
