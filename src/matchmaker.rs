//! Matchmaking: pair two waiting sessions or enqueue the caller
//!
//! Pop-then-validate against the directory store. Only the queue pop is
//! atomic; the endpoint lookup and room formation that follow are not,
//! so a candidate that disconnects in that window is treated as "no
//! match" and the caller re-queues itself. Likewise a session can pop
//! its own stale entry shortly after enqueueing it; both cases cost an
//! extra round trip, never a wrong pairing that sticks.

use tracing::{debug, info};

use crate::bus::PeerEvent;
use crate::error::AppError;
use crate::session::{Session, SessionState};
use crate::types::{Endpoint, RoomId, SessionId};

/// Run one matchmaking attempt for a waiting session
///
/// On success the session is either `Matched` (room formed, partner
/// notified) or back in the waiting queue. Errors are coordination
/// failures; the caller logs them and the session stays waiting.
pub(crate) async fn find_match(session: &mut Session) -> Result<(), AppError> {
    // Refresh liveness before touching the queue
    session
        .directory
        .register_endpoint(session.id, &session.endpoint)
        .await?;

    let Some(candidate) = session.directory.pop_waiting().await? else {
        session.directory.push_waiting(session.id).await?;
        return Ok(());
    };

    if candidate == session.id {
        // Own stale entry at the head: put it back, then queue up again
        session.directory.push_waiting(candidate).await?;
        session.directory.push_waiting(session.id).await?;
        return Ok(());
    }

    let Some(partner_endpoint) = session.directory.lookup_endpoint(candidate).await? else {
        // Candidate vanished between pop and lookup
        debug!(
            "Candidate {} has no endpoint, re-queueing {}",
            candidate, session.id
        );
        session.directory.push_waiting(session.id).await?;
        return Ok(());
    };

    create_room(session, candidate, partner_endpoint).await
}

/// Form a room with the popped candidate and notify both sides
async fn create_room(
    session: &mut Session,
    partner_id: SessionId,
    partner_endpoint: Endpoint,
) -> Result<(), AppError> {
    let room = RoomId::generate();

    session.bus.add_to_group(&room, &session.endpoint).await?;
    session.bus.add_to_group(&room, &partner_endpoint).await?;

    // Both members get the connected notification; the partner also
    // gets a direct event so it can adopt the pairing
    session.bus.send_to_group(&room, PeerEvent::Matched).await?;
    session
        .bus
        .send_to_endpoint(
            &partner_endpoint,
            PeerEvent::SetPartner {
                partner: session.endpoint.clone(),
                room: room.clone(),
            },
        )
        .await?;

    info!("Room {} pairs {} with {}", room, session.id, partner_id);
    session.state = SessionState::Matched {
        partner: partner_endpoint,
        room,
    };
    Ok(())
}
