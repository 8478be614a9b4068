//! Error types for the duet signaling server

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Process-level errors: startup, configuration and listener failures
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Socket or listener failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid server configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Reasons a connection is refused admission into a session
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// No usable session identifier in the connection parameters
    #[error("roomId required")]
    MissingSessionId,

    /// The session already holds two participants
    #[error("room full")]
    SessionFull,
}

impl AdmissionError {
    /// WebSocket close code sent to the rejected connection
    pub fn close_code(self) -> u16 {
        match self {
            // Policy violation
            AdmissionError::MissingSessionId => 1008,
            // Try again later
            AdmissionError::SessionFull => 1013,
        }
    }

    /// WebSocket close reason sent to the rejected connection
    pub fn close_reason(self) -> &'static str {
        match self {
            AdmissionError::MissingSessionId => "roomId required",
            AdmissionError::SessionFull => "room full",
        }
    }
}

/// Error codes carried by `{"type": "error"}` replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadJson,
    UnsupportedType,
}

/// Errors from client messages; reported back to the sender only
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Frame is not a structured message
    #[error("JSON error: {0}")]
    BadJson(#[from] serde_json::Error),

    /// Message type outside the relay whitelist
    #[error("Unsupported message type: {0}")]
    UnsupportedType(String),
}

impl ClientRequestError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientRequestError::BadJson(_) => ErrorCode::BadJson,
            ClientRequestError::UnsupportedType(_) => ErrorCode::UnsupportedType,
        }
    }
}

/// Errors surfaced by the HTTP front end
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// Request body is not valid JSON
    #[error("bad_json")]
    BadJson,

    /// Client-chosen session identifier fails validation
    #[error("invalid_session_id")]
    InvalidSessionId,

    /// Connection limit reached
    #[error("too_many_connections")]
    TooManyConnections,
}

impl ApiError {
    pub fn status(self) -> StatusCode {
        match self {
            ApiError::BadJson | ApiError::InvalidSessionId => StatusCode::BAD_REQUEST,
            ApiError::TooManyConnections => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
