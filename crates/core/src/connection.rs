// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wire connection abstraction (§1: out-of-scope external collaborator,
//! consumed via a small interface) and a `tokio-tungstenite`-backed default
//! implementation, grounded on `upstream/bridge.rs`'s reconnect-with-backoff
//! `run_loop`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::wire::{ClientRequest, ServerMessage};

/// Lifecycle events the core reacts to (§6: "Observable client events").
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Error { message: String },
}

/// Frames handed up from the transport: either a decoded inbound message or
/// a connection lifecycle change.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(ServerMessage),
    Lifecycle(ConnectionEvent),
}

/// The wire connection interface the core depends on: send a typed request,
/// receive typed messages and lifecycle events. Implementors own framing,
/// TLS, and reconnect policy — the core only reacts to `ConnectionEvent`s.
///
/// Sending is synchronous (it hands the request to a channel the transport
/// task drains); the actual I/O happens off this call, so no `async_trait`
/// indirection is needed to keep the trait object-safe.
pub trait Connection: Send {
    fn send(&mut self, request: &ClientRequest) -> Result<(), crate::error::ClientError>;

    /// Request a graceful disconnect (used by `autoDisconnect`).
    fn disconnect(&mut self);
}

/// Spawn a `tokio-tungstenite` connection to `url` with exponential backoff
/// reconnect. Returns a handle used to send requests plus a receiver of
/// `TransportEvent`s, mirroring `upstream/bridge.rs::run_loop`'s shape.
pub fn spawn_ws_connection(
    url: String,
    cancel: CancellationToken,
) -> (WsConnection, mpsc::UnboundedReceiver<TransportEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_loop(url, cancel, event_tx, outbound_rx));

    (WsConnection { outbound_tx }, event_rx)
}

/// Handle used by the client run-loop to push outbound requests onto the
/// connection task.
pub struct WsConnection {
    outbound_tx: mpsc::UnboundedSender<ClientRequest>,
}

impl Connection for WsConnection {
    fn send(&mut self, request: &ClientRequest) -> Result<(), crate::error::ClientError> {
        self.outbound_tx
            .send(request.clone())
            .map_err(|_| crate::error::ClientError::transport("connection task gone"))
    }

    fn disconnect(&mut self) {
        // Dropping the sender closes `outbound_rx`, which the run loop treats
        // as a request to stop reconnecting.
        let (replacement, _unused) = mpsc::unbounded_channel();
        self.outbound_tx = replacement;
    }
}

async fn run_loop(
    url: String,
    cancel: CancellationToken,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientRequest>,
) {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(10);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                backoff = Duration::from_millis(100);
                let _ = event_tx.send(TransportEvent::Lifecycle(ConnectionEvent::Connected));
                let (mut write, mut read) = stream.split();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,

                        msg = read.next() => {
                            match msg {
                                Some(Ok(WsMessage::Text(text))) => {
                                    match serde_json::from_str::<ServerMessage>(&text) {
                                        Ok(parsed) => {
                                            let _ = event_tx.send(TransportEvent::Message(parsed));
                                        }
                                        Err(e) => {
                                            tracing::warn!(err = %e, "failed to decode inbound frame");
                                            let _ = event_tx.send(TransportEvent::Lifecycle(
                                                ConnectionEvent::Error { message: e.to_string() },
                                            ));
                                        }
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Err(e)) => {
                                    tracing::debug!(err = %e, "ws read error");
                                    break;
                                }
                                _ => {}
                            }
                        }

                        req = outbound_rx.recv() => {
                            match req {
                                Some(req) => {
                                    let Ok(json) = serde_json::to_string(&req) else { continue };
                                    if write.send(WsMessage::Text(json.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => return, // disconnect() requested
                            }
                        }
                    }
                }

                let _ = event_tx.send(TransportEvent::Lifecycle(ConnectionEvent::Disconnected));
            }
            Err(e) => {
                tracing::debug!(err = %e, backoff_ms = backoff.as_millis(), "ws connect failed, retrying");
                let _ = event_tx
                    .send(TransportEvent::Lifecycle(ConnectionEvent::Error { message: e.to_string() }));
            }
        }

        // Full jitter: sleep a random fraction of the current backoff window
        // rather than the window itself, so a herd of clients disconnected
        // by the same broker blip doesn't reconnect in lockstep.
        let jittered = Duration::from_millis(rand::rng().random_range(0..=backoff.as_millis() as u64));
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(jittered) => {}
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}
