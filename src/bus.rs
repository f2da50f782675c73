//! Event bus: point-to-point and group fan-out delivery
//!
//! Connects session actors across server processes. Endpoints are
//! opaque names allocated by the bus; groups are named sets of
//! endpoints used for room-wide broadcasts. Delivery is at-most-once
//! and fire-and-forget: sending to an endpoint with no live connection
//! is a silent no-op, and a full inbox drops the event.
//!
//! Two implementations:
//! - [`MemoryBus`]: in-process routing, for single-process runs and tests
//! - [`RedisBus`]: cross-process routing over Redis pub/sub; endpoint
//!   names carry a process prefix and each process runs one dispatcher
//!   task subscribed to its own channel

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::protocol::SenderRole;
use crate::types::{random_token, Endpoint, RoomId};

/// Inbox depth per endpoint
const INBOX_BUFFER: usize = 32;

/// TTL for room membership sets in the Redis backend, in seconds
const GROUP_TTL_SECS: i64 = 3600;

/// Events delivered between session actors
///
/// Serde-tagged so they survive cross-process transport unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerEvent {
    /// Chat message relayed from the partner
    Message { message: String, sender: SenderRole },
    /// Partner's typing indicator changed
    Typing { typing: bool },
    /// Room-wide broadcast: a match was formed
    Matched,
    /// Direct notification carrying the matcher's endpoint and room,
    /// so the popped session can transition to matched as well
    SetPartner { partner: Endpoint, room: RoomId },
    /// Partner moved on to a new match
    PartnerLeft,
    /// Partner's connection closed
    PartnerDisconnected,
}

/// Delivery substrate consumed by session actors
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Allocate a fresh endpoint and return it with its inbox
    async fn register(&self) -> Result<(Endpoint, mpsc::Receiver<PeerEvent>), AppError>;

    /// Drop an endpoint's route; subsequent sends to it are no-ops
    async fn unregister(&self, endpoint: &Endpoint);

    /// Deliver an event to a single endpoint (silent no-op if absent)
    async fn send_to_endpoint(&self, endpoint: &Endpoint, event: PeerEvent)
        -> Result<(), AppError>;

    /// Add an endpoint to a group
    async fn add_to_group(&self, group: &RoomId, endpoint: &Endpoint) -> Result<(), AppError>;

    /// Remove an endpoint from a group
    async fn remove_from_group(&self, group: &RoomId, endpoint: &Endpoint)
        -> Result<(), AppError>;

    /// Fan an event out to every member of a group, in no particular order
    async fn send_to_group(&self, group: &RoomId, event: PeerEvent) -> Result<(), AppError>;
}

/// In-process bus for single-process runs and tests
pub struct MemoryBus {
    process: String,
    routes: DashMap<Endpoint, mpsc::Sender<PeerEvent>>,
    groups: DashMap<RoomId, HashSet<Endpoint>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            process: random_token(8),
            routes: DashMap::new(),
            groups: DashMap::new(),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn register(&self) -> Result<(Endpoint, mpsc::Receiver<PeerEvent>), AppError> {
        let endpoint = Endpoint::generate(&self.process);
        let (tx, rx) = mpsc::channel(INBOX_BUFFER);
        self.routes.insert(endpoint.clone(), tx);
        Ok((endpoint, rx))
    }

    async fn unregister(&self, endpoint: &Endpoint) {
        self.routes.remove(endpoint);
    }

    async fn send_to_endpoint(
        &self,
        endpoint: &Endpoint,
        event: PeerEvent,
    ) -> Result<(), AppError> {
        let Some(tx) = self.routes.get(endpoint).map(|t| t.value().clone()) else {
            return Ok(());
        };
        if tx.try_send(event).is_err() {
            debug!("Inbox full or closed for {}, dropping event", endpoint);
        }
        Ok(())
    }

    async fn add_to_group(&self, group: &RoomId, endpoint: &Endpoint) -> Result<(), AppError> {
        self.groups
            .entry(group.clone())
            .or_default()
            .insert(endpoint.clone());
        Ok(())
    }

    async fn remove_from_group(
        &self,
        group: &RoomId,
        endpoint: &Endpoint,
    ) -> Result<(), AppError> {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(endpoint);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.groups.remove_if(group, |_, members| members.is_empty());
            }
        }
        Ok(())
    }

    async fn send_to_group(&self, group: &RoomId, event: PeerEvent) -> Result<(), AppError> {
        let members: Vec<Endpoint> = self
            .groups
            .get(group)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();

        for member in members {
            self.send_to_endpoint(&member, event.clone()).await?;
        }
        Ok(())
    }
}

/// Wire envelope for cross-process delivery
#[derive(Debug, Serialize, Deserialize)]
struct Delivery {
    target: Endpoint,
    event: PeerEvent,
}

fn process_channel(process: &str) -> String {
    format!("bus:{}", process)
}

fn group_key(room: &RoomId) -> String {
    format!("group:{}", room)
}

/// Redis pub/sub bus, the multi-process deployment backend
///
/// Every process subscribes one dispatcher task to `bus:<process>`.
/// Sending to an endpoint publishes to the channel of the process
/// embedded in the endpoint name; the owning dispatcher then routes
/// the event to the local inbox. Group membership lives in Redis sets
/// so any process can fan out to a room.
pub struct RedisBus {
    manager: ConnectionManager,
    process: String,
    routes: Arc<DashMap<Endpoint, mpsc::Sender<PeerEvent>>>,
}

impl RedisBus {
    /// Connect to Redis and start this process's dispatcher task
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        let process = random_token(8);
        let routes: Arc<DashMap<Endpoint, mpsc::Sender<PeerEvent>>> = Arc::new(DashMap::new());

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(process_channel(&process)).await?;

        let dispatch_routes = Arc::clone(&routes);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Undecodable bus payload: {}", e);
                        continue;
                    }
                };
                let delivery: Delivery = match serde_json::from_str(&payload) {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        warn!("Malformed bus payload: {}", e);
                        continue;
                    }
                };
                let Some(tx) = dispatch_routes
                    .get(&delivery.target)
                    .map(|t| t.value().clone())
                else {
                    debug!("No live endpoint {}, dropping event", delivery.target);
                    continue;
                };
                if tx.try_send(delivery.event).is_err() {
                    debug!("Inbox full or closed for {}, dropping event", delivery.target);
                }
            }
            debug!("Bus dispatcher stopped");
        });

        Ok(Self {
            manager,
            process,
            routes,
        })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn register(&self) -> Result<(Endpoint, mpsc::Receiver<PeerEvent>), AppError> {
        let endpoint = Endpoint::generate(&self.process);
        let (tx, rx) = mpsc::channel(INBOX_BUFFER);
        self.routes.insert(endpoint.clone(), tx);
        Ok((endpoint, rx))
    }

    async fn unregister(&self, endpoint: &Endpoint) {
        self.routes.remove(endpoint);
    }

    async fn send_to_endpoint(
        &self,
        endpoint: &Endpoint,
        event: PeerEvent,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_string(&Delivery {
            target: endpoint.clone(),
            event,
        })?;
        let mut con = self.manager.clone();
        let _: () = con
            .publish(process_channel(endpoint.process()), payload)
            .await?;
        Ok(())
    }

    async fn add_to_group(&self, group: &RoomId, endpoint: &Endpoint) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: () = con.sadd(group_key(group), endpoint.0.clone()).await?;
        let _: () = con.expire(group_key(group), GROUP_TTL_SECS).await?;
        Ok(())
    }

    async fn remove_from_group(
        &self,
        group: &RoomId,
        endpoint: &Endpoint,
    ) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let _: () = con.srem(group_key(group), endpoint.0.clone()).await?;
        Ok(())
    }

    async fn send_to_group(&self, group: &RoomId, event: PeerEvent) -> Result<(), AppError> {
        let mut con = self.manager.clone();
        let members: Vec<String> = con.smembers(group_key(group)).await?;
        for member in members {
            self.send_to_endpoint(&Endpoint(member), event.clone())
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_point_to_point_delivery() {
        let bus = MemoryBus::new();
        let (endpoint, mut inbox) = bus.register().await.unwrap();

        bus.send_to_endpoint(&endpoint, PeerEvent::Matched)
            .await
            .unwrap();

        assert!(matches!(inbox.recv().await, Some(PeerEvent::Matched)));
    }

    #[tokio::test]
    async fn test_send_to_absent_endpoint_is_silent_noop() {
        let bus = MemoryBus::new();
        let ghost = Endpoint::generate("nowhere");

        bus.send_to_endpoint(&ghost, PeerEvent::PartnerLeft)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_group_fanout_reaches_all_members() {
        let bus = MemoryBus::new();
        let (a, mut inbox_a) = bus.register().await.unwrap();
        let (b, mut inbox_b) = bus.register().await.unwrap();
        let room = RoomId::generate();

        bus.add_to_group(&room, &a).await.unwrap();
        bus.add_to_group(&room, &b).await.unwrap();
        bus.send_to_group(&room, PeerEvent::Matched).await.unwrap();

        assert!(matches!(inbox_a.recv().await, Some(PeerEvent::Matched)));
        assert!(matches!(inbox_b.recv().await, Some(PeerEvent::Matched)));
    }

    #[tokio::test]
    async fn test_removed_member_stops_receiving() {
        let bus = MemoryBus::new();
        let (a, mut inbox_a) = bus.register().await.unwrap();
        let (b, mut inbox_b) = bus.register().await.unwrap();
        let room = RoomId::generate();

        bus.add_to_group(&room, &a).await.unwrap();
        bus.add_to_group(&room, &b).await.unwrap();
        bus.remove_from_group(&room, &a).await.unwrap();
        bus.send_to_group(&room, PeerEvent::Matched).await.unwrap();

        assert!(matches!(inbox_b.recv().await, Some(PeerEvent::Matched)));
        assert!(inbox_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_drops_route() {
        let bus = MemoryBus::new();
        let (endpoint, mut inbox) = bus.register().await.unwrap();

        bus.unregister(&endpoint).await;
        bus.send_to_endpoint(&endpoint, PeerEvent::Matched)
            .await
            .unwrap();

        // Sender side is gone, so the inbox ends instead of receiving
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_inbox_drops_instead_of_blocking() {
        let bus = MemoryBus::new();
        let (endpoint, mut inbox) = bus.register().await.unwrap();

        for _ in 0..INBOX_BUFFER + 5 {
            bus.send_to_endpoint(&endpoint, PeerEvent::Typing { typing: true })
                .await
                .unwrap();
        }

        let mut received = 0;
        while inbox.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, INBOX_BUFFER);
    }

    #[test]
    fn test_peer_event_transport_roundtrip() {
        let event = PeerEvent::SetPartner {
            partner: Endpoint::generate("p1"),
            room: RoomId::generate(),
        };
        let json = serde_json::to_string(&Delivery {
            target: Endpoint::generate("p2"),
            event,
        })
        .unwrap();
        let delivery: Delivery = serde_json::from_str(&json).unwrap();
        assert!(matches!(delivery.event, PeerEvent::SetPartner { .. }));
    }
}
