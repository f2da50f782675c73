//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, message
//! parsing, and the event loop that feeds the session actor. Client
//! frames and bus events are merged into one sequential path, so all
//! session state mutations happen in order with no locking.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use crate::bus::EventBus;
use crate::directory::Directory;
use crate::error::AppError;
use crate::protocol::{ClientEnvelope, ServerEnvelope};
use crate::session::Session;

/// Buffer for server → client envelopes
const OUTBOUND_BUFFER: usize = 32;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, starts the session actor, and runs
/// its event loop until the client goes away. Teardown runs exactly
/// once whether the close was graceful or a transport error.
pub async fn handle_connection(
    stream: TcpStream,
    directory: Arc<dyn Directory>,
    bus: Arc<dyn EventBus>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Channel for session -> client envelopes
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEnvelope>(OUTBOUND_BUFFER);

    // Spawn write task (ServerEnvelope -> WebSocket)
    let write_task = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize envelope: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for client");

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    let (mut session, mut inbox) = Session::start(directory, bus, out_tx).await?;

    // Event loop: the session's single sequential path
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEnvelope>(&text) {
                            Ok(envelope) => session.on_client_event(envelope).await,
                            Err(e) => {
                                warn!("Invalid JSON from session {}: {}", session.id(), e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Session {} sent close frame", session.id());
                        break;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Some(Ok(_)) => {
                        // Binary or other frame types - ignore
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error for session {}: {}", session.id(), e);
                        break;
                    }
                    None => {
                        debug!("Stream ended for session {}", session.id());
                        break;
                    }
                }
            }
            event = inbox.recv() => {
                match event {
                    Some(event) => session.on_peer_event(event).await,
                    None => {
                        debug!("Bus inbox closed for session {}", session.id());
                        break;
                    }
                }
            }
        }
    }

    session.close().await;

    // Dropping the session drops the last envelope sender, letting the
    // write task flush and send the close frame
    drop(session);
    let _ = write_task.await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::directory::MemoryDirectory;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Start a server on an ephemeral port with in-memory coordination
    async fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let bus: Arc<dyn EventBus> = Arc::new(MemoryBus::new());

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let directory = directory.clone();
                let bus = bus.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, directory, bus).await;
                });
            }
        });

        format!("ws://{}", addr)
    }

    async fn recv_json(ws: &mut WsClient) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn send_json(ws: &mut WsClient, value: Value) {
        ws.send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_chat_flow() {
        let url = spawn_server().await;

        // X connects and waits
        let (mut x, _) = connect_async(url.as_str()).await.unwrap();
        let status = recv_json(&mut x).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["status"], "waiting");

        // Y connects and both get matched
        let (mut y, _) = connect_async(url.as_str()).await.unwrap();
        assert_eq!(recv_json(&mut y).await["status"], "waiting");
        assert_eq!(recv_json(&mut y).await["status"], "connected");
        assert_eq!(recv_json(&mut x).await["status"], "connected");

        // X sends a message: Y sees the stranger copy, X the echo
        send_json(&mut x, json!({"type": "message", "message": "hello"})).await;
        let echo = recv_json(&mut x).await;
        assert_eq!(echo["type"], "message");
        assert_eq!(echo["message"], "hello");
        assert_eq!(echo["sender"], "you");
        assert!(echo["timestamp"].is_string());
        let relayed = recv_json(&mut y).await;
        assert_eq!(relayed["message"], "hello");
        assert_eq!(relayed["sender"], "stranger");

        // Typing indicator is forwarded verbatim
        send_json(&mut y, json!({"type": "typing", "typing": true})).await;
        let typing = recv_json(&mut x).await;
        assert_eq!(typing["type"], "typing");
        assert_eq!(typing["typing"], true);

        // Unknown types and malformed payloads are ignored, not fatal
        send_json(&mut x, json!({"type": "video_call"})).await;
        x.send(Message::Text("not json".into())).await.unwrap();

        // Y disconnects: X goes back to waiting
        drop(y);
        let status = recv_json(&mut x).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["status"], "waiting");
    }

    #[tokio::test]
    async fn test_next_recycles_both_sessions() {
        let url = spawn_server().await;

        let (mut x, _) = connect_async(url.as_str()).await.unwrap();
        assert_eq!(recv_json(&mut x).await["status"], "waiting");
        let (mut y, _) = connect_async(url.as_str()).await.unwrap();
        assert_eq!(recv_json(&mut y).await["status"], "waiting");
        assert_eq!(recv_json(&mut y).await["status"], "connected");
        assert_eq!(recv_json(&mut x).await["status"], "connected");

        // X skips; with no third client around, X and Y re-match
        send_json(&mut x, json!({"type": "next"})).await;
        assert_eq!(recv_json(&mut x).await["status"], "waiting");
        assert_eq!(recv_json(&mut y).await["status"], "waiting");
        assert_eq!(recv_json(&mut y).await["status"], "connected");
        assert_eq!(recv_json(&mut x).await["status"], "connected");

        // The refreshed pairing still relays
        send_json(&mut y, json!({"type": "message", "message": "again"})).await;
        assert_eq!(recv_json(&mut x).await["message"], "again");
    }
}
