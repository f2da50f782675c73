//! Session actor: one per connected client
//!
//! Owns the connection's matchmaking state and drives message relay
//! and teardown. All mutations happen on a single sequential path: the
//! connection handler feeds the actor an interleaving of client
//! envelopes and bus events, so no intra-session locking is needed.
//! Cross-session coordination goes exclusively through the directory
//! store and the event bus, never through shared memory.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::bus::{EventBus, PeerEvent};
use crate::directory::Directory;
use crate::error::AppError;
use crate::matchmaker;
use crate::protocol::{now_rfc3339, ClientEnvelope, SenderRole, ServerEnvelope, StatusKind};
use crate::sanitize::sanitize_message;
use crate::types::{Endpoint, RoomId, SessionId};

const MSG_WAITING: &str = "Looking for someone to chat with...";
const MSG_CONNECTED: &str = "Connected to a stranger! Say hello.";
const MSG_NEXT: &str = "Looking for someone new to chat with...";
const MSG_PARTNER_LEFT: &str = "Stranger has found someone new. Looking for another person...";
const MSG_PARTNER_DISCONNECTED: &str = "Stranger has disconnected. Looking for someone new...";

/// Matchmaking state of a session
///
/// `Closed` is terminal; teardown runs exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// In the waiting queue, no partner
    Waiting,
    /// Paired: the partner's endpoint and the shared room
    Matched { partner: Endpoint, room: RoomId },
    /// Connection closed, cleanup done
    Closed,
}

/// Per-connection actor holding matchmaking and relay state
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) endpoint: Endpoint,
    pub(crate) state: SessionState,
    connected_at: Instant,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) bus: Arc<dyn EventBus>,
    client: mpsc::Sender<ServerEnvelope>,
}

impl Session {
    /// Register on the bus, greet the client, and enter matchmaking
    ///
    /// Returns the session together with its bus inbox; the caller owns
    /// the loop that feeds both event sources back in. A coordination
    /// failure during the first match attempt leaves the session
    /// waiting, it does not fail the connection.
    pub async fn start(
        directory: Arc<dyn Directory>,
        bus: Arc<dyn EventBus>,
        client: mpsc::Sender<ServerEnvelope>,
    ) -> Result<(Self, mpsc::Receiver<PeerEvent>), AppError> {
        let (endpoint, inbox) = bus.register().await?;
        let mut session = Self {
            id: SessionId::new(),
            endpoint,
            state: SessionState::Waiting,
            connected_at: Instant::now(),
            directory,
            bus,
            client,
        };

        info!("Session {} connected as {}", session.id, session.endpoint);
        session.emit_status(StatusKind::Waiting, MSG_WAITING).await;
        session.find_match_logged().await;

        Ok((session, inbox))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Process one envelope from the session's own client
    pub async fn on_client_event(&mut self, envelope: ClientEnvelope) {
        match envelope {
            ClientEnvelope::Message { message } => self.relay_message(message).await,
            ClientEnvelope::Next => self.next_partner().await,
            ClientEnvelope::Typing { typing } => self.relay_typing(typing).await,
            ClientEnvelope::Unknown => {
                debug!("Session {} sent an unrecognized message type", self.id);
            }
        }
    }

    /// Process one event delivered through the bus
    pub async fn on_peer_event(&mut self, event: PeerEvent) {
        if matches!(self.state, SessionState::Closed) {
            return;
        }
        match event {
            PeerEvent::Message { message, sender } => {
                self.emit(ServerEnvelope::Message {
                    message,
                    sender,
                    timestamp: now_rfc3339(),
                })
                .await;
            }
            PeerEvent::Typing { typing } => {
                self.emit(ServerEnvelope::Typing { typing }).await;
            }
            PeerEvent::Matched => {
                self.emit_status(StatusKind::Connected, MSG_CONNECTED).await;
            }
            PeerEvent::SetPartner { partner, room } => {
                // A stale queue entry can re-partner an already matched
                // session; last writer wins, matching the store's view.
                if let SessionState::Matched { room: old_room, .. } = &self.state {
                    let old_room = old_room.clone();
                    self.leave_group(&old_room).await;
                }
                debug!("Session {} paired into {} with {}", self.id, room, partner);
                self.state = SessionState::Matched { partner, room };
            }
            PeerEvent::PartnerLeft => {
                self.partner_lost(MSG_PARTNER_LEFT).await;
            }
            PeerEvent::PartnerDisconnected => {
                self.partner_lost(MSG_PARTNER_DISCONNECTED).await;
            }
        }
    }

    /// Exactly-once teardown for both graceful closes and transport errors
    ///
    /// Everything here is best effort: a dead coordination store must
    /// never block the close. Expiry on the directory entries bounds
    /// whatever this fails to clean up.
    pub async fn close(&mut self) {
        if matches!(self.state, SessionState::Closed) {
            return;
        }
        if let SessionState::Matched { partner, room } =
            std::mem::replace(&mut self.state, SessionState::Closed)
        {
            if let Err(e) = self
                .bus
                .send_to_endpoint(&partner, PeerEvent::PartnerDisconnected)
                .await
            {
                error!("Disconnect notification to {} failed: {}", partner, e);
            }
            self.leave_group(&room).await;
        }

        if let Err(e) = self.directory.remove_waiting(self.id).await {
            error!("Queue cleanup for {} failed: {}", self.id, e);
        }
        if let Err(e) = self.directory.remove_endpoint(self.id).await {
            error!("Directory cleanup for {} failed: {}", self.id, e);
        }
        self.bus.unregister(&self.endpoint).await;

        info!(
            "Session {} disconnected after {:?}",
            self.id,
            self.connected_at.elapsed()
        );
    }

    async fn relay_message(&mut self, message: String) {
        let SessionState::Matched { partner, .. } = &self.state else {
            // Unmatched messages are dropped silently
            return;
        };
        let partner = partner.clone();

        let message = sanitize_message(&message);
        if message.is_empty() {
            return;
        }

        if let Err(e) = self
            .bus
            .send_to_endpoint(
                &partner,
                PeerEvent::Message {
                    message: message.clone(),
                    sender: SenderRole::Stranger,
                },
            )
            .await
        {
            error!("Relay from {} to {} failed: {}", self.id, partner, e);
            return;
        }

        self.emit(ServerEnvelope::Message {
            message,
            sender: SenderRole::You,
            timestamp: now_rfc3339(),
        })
        .await;
    }

    async fn relay_typing(&mut self, typing: bool) {
        let SessionState::Matched { partner, .. } = &self.state else {
            return;
        };
        let partner = partner.clone();
        if let Err(e) = self
            .bus
            .send_to_endpoint(&partner, PeerEvent::Typing { typing })
            .await
        {
            error!("Typing relay to {} failed: {}", partner, e);
        }
    }

    /// Leave the current partner (if any) and re-enter matchmaking
    ///
    /// A no-op re-match when already waiting is harmless.
    async fn next_partner(&mut self) {
        if matches!(self.state, SessionState::Closed) {
            return;
        }
        if let SessionState::Matched { partner, room } =
            std::mem::replace(&mut self.state, SessionState::Waiting)
        {
            if let Err(e) = self
                .bus
                .send_to_endpoint(&partner, PeerEvent::PartnerLeft)
                .await
            {
                error!("Partner-left notification to {} failed: {}", partner, e);
            }
            self.leave_group(&room).await;
        }

        self.emit_status(StatusKind::Waiting, MSG_NEXT).await;
        self.find_match_logged().await;
    }

    async fn partner_lost(&mut self, text: &str) {
        if let SessionState::Matched { room, .. } =
            std::mem::replace(&mut self.state, SessionState::Waiting)
        {
            self.leave_group(&room).await;
        }
        self.emit_status(StatusKind::Waiting, text).await;
        self.find_match_logged().await;
    }

    pub(crate) async fn find_match_logged(&mut self) {
        if let Err(e) = matchmaker::find_match(self).await {
            error!("Matchmaking failed for {}: {}", self.id, e);
        }
    }

    async fn leave_group(&self, room: &RoomId) {
        if let Err(e) = self.bus.remove_from_group(room, &self.endpoint).await {
            error!("Leaving room {} failed for {}: {}", room, self.id, e);
        }
    }

    async fn emit_status(&self, status: StatusKind, text: &str) {
        self.emit(ServerEnvelope::Status {
            message: text.to_string(),
            status,
        })
        .await;
    }

    async fn emit(&self, envelope: ServerEnvelope) {
        if self.client.send(envelope).await.is_err() {
            debug!("Client channel closed for session {}", self.id);
        }
    }
}
