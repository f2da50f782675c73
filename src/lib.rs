//! Anonymous 1:1 Stranger Chat Server Library
//!
//! A WebSocket chat server that anonymously pairs concurrent clients
//! into one-to-one sessions, relays messages and typing signals, and
//! re-pairs on demand or on partner loss. Matchmaking coordinates
//! through a shared directory store (FIFO waiting queue + endpoint
//! directory) and an event bus, so multiple server processes can share
//! one user pool.
//!
//! # Features
//! - WebSocket connection handling
//! - Anonymous FIFO matchmaking with re-pairing ("next")
//! - Real-time message relay with sender echo
//! - Typing indicators
//! - Partner-loss notification and automatic re-matching
//! - Message sanitization (whitespace collapsing, length cap)
//! - Redis-backed coordination for multi-process deployments,
//!   in-memory coordination for single-process runs and tests
//!
//! # Architecture
//! One actor per connection, no shared in-process state:
//! - Each connection runs a [`session::Session`] actor fed by a single
//!   sequential event loop merging the client socket with its bus inbox
//! - The [`directory::Directory`] store holds the waiting queue (atomic
//!   pop) and session → endpoint lookups with a bounded TTL
//! - The [`bus::EventBus`] delivers point-to-point and room-wide events
//!   between sessions, across process boundaries when backed by Redis
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use stranger_chat::{handle_connection, Directory, EventBus, MemoryBus, MemoryDirectory};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
//!     let bus: Arc<dyn EventBus> = Arc::new(MemoryBus::new());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let (directory, bus) = (directory.clone(), bus.clone());
//!         tokio::spawn(handle_connection(stream, directory, bus));
//!     }
//! }
//! ```

pub mod bus;
pub mod directory;
pub mod error;
pub mod handler;
mod matchmaker;
pub mod protocol;
pub mod sanitize;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use bus::{EventBus, MemoryBus, PeerEvent, RedisBus};
pub use directory::{Directory, MemoryDirectory, RedisDirectory};
pub use error::AppError;
pub use handler::handle_connection;
pub use protocol::{ClientEnvelope, SenderRole, ServerEnvelope, StatusKind};
pub use sanitize::{sanitize_message, MAX_MESSAGE_LEN};
pub use session::{Session, SessionState};
pub use types::{Endpoint, RoomId, SessionId};
