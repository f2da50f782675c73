//! Directory store: waiting queue + endpoint directory
//!
//! The shared store that lets independent server processes cooperate on
//! matchmaking. Holds two things:
//! - a FIFO queue of waiting session identifiers (`waiting_users`)
//! - a session → endpoint mapping (`user:<id>:channel`) with a bounded
//!   TTL so entries from crashed sessions expire on their own
//!
//! The queue pop must be atomic at the store level; everything else is
//! per-session state and needs no locking.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::types::{Endpoint, SessionId};

/// Redis key holding the FIFO waiting queue
const WAITING_KEY: &str = "waiting_users";

/// TTL for endpoint directory entries, in seconds
const ENDPOINT_TTL_SECS: u64 = 3600;

fn endpoint_key(session: SessionId) -> String {
    format!("user:{}:channel", session)
}

/// Store interface consumed by the matchmaker and session teardown
///
/// Object-safe so sessions can hold an `Arc<dyn Directory>` regardless
/// of the backing store.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Upsert the session's endpoint entry, refreshing its TTL
    async fn register_endpoint(
        &self,
        session: SessionId,
        endpoint: &Endpoint,
    ) -> Result<(), AppError>;

    /// Look up a session's endpoint; `None` if expired or never registered
    async fn lookup_endpoint(&self, session: SessionId) -> Result<Option<Endpoint>, AppError>;

    /// Delete the session's endpoint entry
    async fn remove_endpoint(&self, session: SessionId) -> Result<(), AppError>;

    /// Append a session identifier to the tail of the waiting queue
    async fn push_waiting(&self, session: SessionId) -> Result<(), AppError>;

    /// Atomically pop the head of the waiting queue
    async fn pop_waiting(&self) -> Result<Option<SessionId>, AppError>;

    /// Remove every occurrence of a session identifier from the queue
    async fn remove_waiting(&self, session: SessionId) -> Result<(), AppError>;
}

/// Redis-backed directory, the multi-process deployment backend
///
/// Uses `RPUSH`/`LPOP` for the queue (LPOP is atomic server-side) and
/// `SET EX`/`GET`/`DEL` for endpoint entries.
#[derive(Clone)]
pub struct RedisDirectory {
    manager: ConnectionManager,
}

impl RedisDirectory {
    /// Connect to Redis at the given URL
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Directory for RedisDirectory {
    async fn register_endpoint(
        &self,
        session: SessionId,
        endpoint: &Endpoint,
    ) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: () = con
            .set_ex(endpoint_key(session), endpoint.0.clone(), ENDPOINT_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn lookup_endpoint(&self, session: SessionId) -> Result<Option<Endpoint>, AppError> {
        let mut con = self.manager.clone();
        let value: Option<String> = con.get(endpoint_key(session)).await?;
        Ok(value.map(Endpoint))
    }

    async fn remove_endpoint(&self, session: SessionId) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: () = con.del(endpoint_key(session)).await?;
        Ok(())
    }

    async fn push_waiting(&self, session: SessionId) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: () = con.rpush(WAITING_KEY, session.to_string()).await?;
        Ok(())
    }

    async fn pop_waiting(&self) -> Result<Option<SessionId>, AppError> {
        let mut con = self.manager.clone();
        let popped: Option<String> = con.lpop(WAITING_KEY, None).await?;
        Ok(popped.as_deref().and_then(SessionId::parse))
    }

    async fn remove_waiting(&self, session: SessionId) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        // count 0 removes all occurrences, matching LREM semantics
        let _: () = con.lrem(WAITING_KEY, 0, session.to_string()).await?;
        Ok(())
    }
}

/// In-process directory for single-process runs and tests
///
/// TTL is not enforced here: the entries die with the process, which is
/// what the TTL bounds in the Redis backend.
#[derive(Default)]
pub struct MemoryDirectory {
    queue: Mutex<VecDeque<SessionId>>,
    endpoints: DashMap<SessionId, Endpoint>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn register_endpoint(
        &self,
        session: SessionId,
        endpoint: &Endpoint,
    ) -> Result<(), AppError> {
        self.endpoints.insert(session, endpoint.clone());
        Ok(())
    }

    async fn lookup_endpoint(&self, session: SessionId) -> Result<Option<Endpoint>, AppError> {
        Ok(self.endpoints.get(&session).map(|e| e.clone()))
    }

    async fn remove_endpoint(&self, session: SessionId) -> Result<(), AppError> {
        self.endpoints.remove(&session);
        Ok(())
    }

    async fn push_waiting(&self, session: SessionId) -> Result<(), AppError> {
        self.queue.lock().await.push_back(session);
        Ok(())
    }

    async fn pop_waiting(&self) -> Result<Option<SessionId>, AppError> {
        Ok(self.queue.lock().await.pop_front())
    }

    async fn remove_waiting(&self, session: SessionId) -> Result<(), AppError> {
        self.queue.lock().await.retain(|s| *s != session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let dir = MemoryDirectory::new();
        let ids: Vec<SessionId> = (0..5).map(|_| SessionId::new()).collect();

        for id in &ids {
            dir.push_waiting(*id).await.unwrap();
        }

        for id in &ids {
            assert_eq!(dir.pop_waiting().await.unwrap(), Some(*id));
        }
        assert_eq!(dir.pop_waiting().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queue_holds_distinct_entries() {
        let dir = MemoryDirectory::new();
        let ids: Vec<SessionId> = (0..10).map(|_| SessionId::new()).collect();

        for id in &ids {
            dir.push_waiting(*id).await.unwrap();
        }

        let mut popped = Vec::new();
        while let Some(id) = dir.pop_waiting().await.unwrap() {
            popped.push(id);
        }
        assert_eq!(popped, ids);
    }

    #[tokio::test]
    async fn test_remove_waiting_clears_all_occurrences() {
        let dir = MemoryDirectory::new();
        let a = SessionId::new();
        let b = SessionId::new();

        dir.push_waiting(a).await.unwrap();
        dir.push_waiting(b).await.unwrap();
        dir.push_waiting(a).await.unwrap();

        dir.remove_waiting(a).await.unwrap();

        assert_eq!(dir.pop_waiting().await.unwrap(), Some(b));
        assert_eq!(dir.pop_waiting().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_endpoint_register_lookup_remove() {
        let dir = MemoryDirectory::new();
        let id = SessionId::new();
        let ep = Endpoint::generate("test");

        assert_eq!(dir.lookup_endpoint(id).await.unwrap(), None);

        dir.register_endpoint(id, &ep).await.unwrap();
        assert_eq!(dir.lookup_endpoint(id).await.unwrap(), Some(ep));

        dir.remove_endpoint(id).await.unwrap();
        assert_eq!(dir.lookup_endpoint(id).await.unwrap(), None);
    }
}
