//! Error types for the chat server
//!
//! Defines application-level errors covering the WebSocket transport,
//! the wire protocol, and the Redis coordination layer.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Transport and IO errors are fatal for the affected connection;
/// coordination errors are logged and absorbed at the operation
/// boundary so one failed round-trip never crashes the service.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal for the connection)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Directory store or event bus round-trip failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
