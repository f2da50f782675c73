//! Wire protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.
//!
//! Unrecognized `type` values from the client deserialize into
//! [`ClientEnvelope::Unknown`] and are ignored; malformed JSON is a
//! parse error handled (and logged) by the caller, never a fatal one.

use serde::{Deserialize, Serialize};

/// Client → Server envelope
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Send a chat message to the current partner
    Message { message: String },
    /// Leave the current partner and look for a new one
    Next,
    /// Typing indicator state change
    Typing { typing: bool },
    /// Any unrecognized message type (ignored)
    #[serde(other)]
    Unknown,
}

/// Server → Client envelope
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Matchmaking state update
    Status { message: String, status: StatusKind },
    /// Chat message, either the partner's or the sender's own echo
    Message {
        message: String,
        sender: SenderRole,
        timestamp: String,
    },
    /// Partner's typing indicator
    Typing { typing: bool },
}

/// Matchmaking state as shown to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// No partner yet, session is in the waiting queue
    Waiting,
    /// Paired with a stranger
    Connected,
}

/// Who a delivered chat message came from, relative to the receiving client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// The receiving client's own message, echoed back
    You,
    /// The partner's message
    Stranger,
}

/// Current UTC time as an RFC 3339 string, stamped on delivered messages
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
