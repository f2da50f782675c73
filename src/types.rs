//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based unique session identifier
//! - `Endpoint`: process-prefixed routable endpoint name
//! - `RoomId`: generated identifier for an ephemeral two-person room

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4, generated at connect time and never reused.
/// This is the identifier stored in the waiting queue and the
/// endpoint directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from its string form (as stored in the directory)
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressable endpoint name, one per live connection
///
/// Shaped as `<process>!<random>` so a cross-process bus can route an
/// event to the process that owns the connection. Allocated by the
/// event bus, never by the session itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint(pub String);

impl Endpoint {
    /// Generate a fresh endpoint name under the given process prefix
    pub fn generate(process: &str) -> Self {
        Self(format!("{}!{}", process, random_token(12)))
    }

    /// The process prefix, i.e. everything before the `!` separator
    pub fn process(&self) -> &str {
        self.0.split('!').next().unwrap_or("")
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier for a matched pair
///
/// Rooms are ephemeral: the identifier only names a group in the event
/// bus, nothing is stored under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    /// Generate a new random room identifier
    pub fn generate() -> Self {
        Self(format!("chat_{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Random alphanumeric token used for endpoint name suffixes
pub fn random_token(len: usize) -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_parse_roundtrip() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(&id.to_string()), Some(id));
        assert!(SessionId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn test_endpoint_process_prefix() {
        let ep = Endpoint::generate("proc42");
        assert_eq!(ep.process(), "proc42");
        assert!(ep.0.len() > "proc42!".len());
    }

    #[test]
    fn test_endpoints_unique() {
        let a = Endpoint::generate("p");
        let b = Endpoint::generate("p");
        assert_ne!(a, b);
    }

    #[test]
    fn test_room_id_prefix() {
        let room = RoomId::generate();
        assert!(room.0.starts_with("chat_"));
        assert_ne!(room, RoomId::generate());
    }
}
