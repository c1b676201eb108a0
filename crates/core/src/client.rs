// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The public `Client`: a single run-loop task owning every piece of mutable
//! state, driven by a `tokio::select!` over commands and transport events
//! (§5). Grounded on `upstream/bridge.rs`'s `WsBridge::connect` loop, whose
//! `Arc<RwLock<HashMap<...>>>` sharing is replaced here by exclusive
//! ownership inside one task — a better fit for this spec's "single
//! logical task runner, no shared-memory races" model than copying the
//! teacher's lock verbatim.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::connection::{spawn_ws_connection, Connection, ConnectionEvent, TransportEvent};
use crate::correlator::RequestCorrelator;
use crate::dispatcher::{Dispatcher, RouteOutcome};
use crate::error::ClientError;
use crate::message::{Partition, ResendOption, StreamId, SubscriptionKey};
use crate::ordering::OrderingTracker;
use crate::registry::{SubscribeAction, SubscriptionRegistry};
use crate::resend::{self, ResendCoordinator};
use crate::subscription::{SubscriptionHandle, SubscriptionId};
use crate::token::{TokenCache, TokenProvider};
use crate::verifier::{MessageVerifier, StreamRequirement};
use crate::wire::{ClientRequest, RequestId};

enum Command {
    Connect { reply: oneshot::Sender<Result<(), ClientError>> },
    Disconnect { reply: oneshot::Sender<()> },
    Subscribe {
        stream_id: StreamId,
        partition: Partition,
        resend: Option<ResendOption>,
        reply: oneshot::Sender<Result<SubscriptionHandle, ClientError>>,
    },
    Unsubscribe { key: SubscriptionKey, id: SubscriptionId, reply: oneshot::Sender<Result<(), ClientError>> },
    /// Fired by a detached timer task once the empty-resend storage-settle
    /// delay elapses (§4.4).
    ResendRetryFire { key: SubscriptionKey, request_id: RequestId, option: ResendOption },
    Shutdown,
}

/// Errors surfaced on the client-wide error stream (§6, §7): every error the
/// core produces that isn't already delivered through a more specific
/// channel (a command's reply, or a subscription's own event stream) lands
/// here instead of being swallowed — a protocol violation like an unmatched
/// `UnicastMessage`, a decode failure, or a connection-level error.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Error(ClientError),
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Builds the connection for one connect attempt, given the url and the
/// cancellation token that must be torn down with it. Swappable so tests can
/// supply an in-memory `Connection` instead of a real websocket.
pub type ConnectFn = Arc<
    dyn Fn(String, CancellationToken) -> (Box<dyn Connection>, mpsc::UnboundedReceiver<TransportEvent>)
        + Send
        + Sync,
>;

fn default_connector() -> ConnectFn {
    Arc::new(|url, cancel| {
        let (handle, events) = spawn_ws_connection(url, cancel);
        (Box::new(handle) as Box<dyn Connection>, events)
    })
}

/// The user-facing handle. Cloning shares the same run loop; dropping every
/// clone lets the run loop exit once its command channel closes.
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Start the run loop for `url` with `config`, using `provider` to
    /// resolve session tokens and `requirement` to decide `auto`-mode
    /// verification. Connects immediately if `config.auto_connect`.
    pub fn spawn(
        url: String,
        config: ClientConfig,
        provider: Arc<dyn TokenProvider>,
        requirement: Arc<dyn StreamRequirement>,
    ) -> (Self, broadcast::Receiver<ClientEvent>) {
        Self::spawn_with_connector(url, config, provider, requirement, default_connector())
    }

    /// As `spawn`, but with the websocket transport replaced by `connector` —
    /// the seam integration tests use to drive the run loop without a real
    /// socket.
    pub fn spawn_with_connector(
        url: String,
        config: ClientConfig,
        provider: Arc<dyn TokenProvider>,
        requirement: Arc<dyn StreamRequirement>,
        connector: ConnectFn,
    ) -> (Self, broadcast::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let auto_connect = config.auto_connect;
        let client = Self { cmd_tx: cmd_tx.clone() };

        tokio::spawn(run(url, config, provider, requirement, connector, cmd_rx, cmd_tx, event_tx));

        if auto_connect {
            let connect_tx = client.cmd_tx.clone();
            tokio::spawn(async move {
                let (reply, _rx) = oneshot::channel();
                let _ = connect_tx.send(Command::Connect { reply });
            });
        }

        (client, event_rx)
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { reply })
            .map_err(|_| ClientError::transport("client run loop gone"))?;
        rx.await.map_err(|_| ClientError::transport("client run loop gone"))?
    }

    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn subscribe(
        &self,
        stream_id: impl Into<StreamId>,
        partition: Partition,
        resend: Option<ResendOption>,
    ) -> Result<SubscriptionHandle, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe { stream_id: stream_id.into(), partition, resend, reply })
            .map_err(|_| ClientError::transport("client run loop gone"))?;
        rx.await.map_err(|_| ClientError::transport("client run loop gone"))?
    }

    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Unsubscribe { key: handle.key.clone(), id: handle.id, reply })
            .map_err(|_| ClientError::transport("client run loop gone"))?;
        rx.await.map_err(|_| ClientError::transport("client run loop gone"))?
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

struct ConnectionSlot {
    handle: Box<dyn Connection>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
}

async fn run(
    url: String,
    config: ClientConfig,
    provider: Arc<dyn TokenProvider>,
    requirement: Arc<dyn StreamRequirement>,
    connector: ConnectFn,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    self_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<ClientEvent>,
) {
    let mut registry = SubscriptionRegistry::new();
    let mut correlator = RequestCorrelator::new();
    let mut verifier = MessageVerifier::new(config.verify_signatures, requirement);
    let mut ordering = OrderingTracker::new();
    let mut resend_coordinator = ResendCoordinator::new(config.retry_resend_after, config.retry_resend_on_empty);
    let token_cache = TokenCache::new(provider);
    // Maps a resend/subscribe/unsubscribe request id back to the key it was
    // issued for, since several inbound frame types carry only the id.
    let mut request_keys: HashMap<RequestId, SubscriptionKey> = HashMap::new();

    let mut connection: Option<ConnectionSlot> = None;
    let mut connect_waiters: Vec<oneshot::Sender<Result<(), ClientError>>> = Vec::new();
    let root_cancel = CancellationToken::new();

    loop {
        let inbound = async {
            match &mut connection {
                Some(slot) => slot.events.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Shutdown => {
                        root_cancel.cancel();
                        break;
                    }

                    Command::Connect { reply } => {
                        if connection.is_some() {
                            let _ = reply.send(Ok(()));
                        } else {
                            let cancel = root_cancel.child_token();
                            let (handle, events) = connector(url.clone(), cancel.clone());
                            connection = Some(ConnectionSlot { handle, events, cancel });
                            connect_waiters.push(reply);
                        }
                    }

                    Command::Disconnect { reply } => {
                        if let Some(mut slot) = connection.take() {
                            slot.handle.disconnect();
                            slot.cancel.cancel();
                        }
                        correlator.fail_all_disconnected();
                        let _ = reply.send(());
                    }

                    Command::Subscribe { stream_id, partition, resend, reply } => {
                        let key = SubscriptionKey { stream_id, partition };
                        let cancel = root_cancel.child_token();
                        let (handle, action) = registry.subscribe(key.clone(), resend.clone(), cancel);

                        if let SubscribeAction::IssueSubscribe(request_id) = action {
                            request_keys.insert(request_id, key.clone());
                            if let Some(slot) = connection.as_mut() {
                                send_subscribe(slot, &key, request_id, &token_cache, &config).await;
                            }
                        }

                        if let Some(option) = resend {
                            if let Some(member) = registry.member_mut(&key, handle.id) {
                                let request_id = RequestId::new();
                                member.pending_resend_request_ids.insert(request_id);
                                resend_coordinator.start(request_id, handle.id, option.clone());
                                request_keys.insert(request_id, key.clone());
                                if let Some(slot) = connection.as_mut() {
                                    send_resend(slot, &key, request_id, &option, &token_cache, &config).await;
                                }
                            }
                        }

                        let _ = reply.send(Ok(handle));
                    }

                    Command::Unsubscribe { key, id, reply } => {
                        resend_coordinator.abort_all_for(id);
                        match registry.unsubscribe(&key, id) {
                            Some(crate::registry::UnsubscribeAction::IssueUnsubscribe(request_id)) => {
                                request_keys.insert(request_id, key.clone());
                                if let Some(slot) = connection.as_mut() {
                                    send_unsubscribe(slot, &key, request_id, &token_cache, &config).await;
                                }
                            }
                            Some(crate::registry::UnsubscribeAction::StillActive) | None => {}
                        }

                        if config.auto_disconnect && registry.total_subscriptions() == 0 {
                            if let Some(mut slot) = connection.take() {
                                slot.handle.disconnect();
                                slot.cancel.cancel();
                            }
                        }
                        let _ = reply.send(Ok(()));
                    }

                    Command::ResendRetryFire { key, request_id, option } => {
                        request_keys.insert(request_id, key.clone());
                        if let Some(slot) = connection.as_mut() {
                            send_resend(slot, &key, request_id, &option, &token_cache, &config).await;
                        }
                    }
                }
            }

            event = inbound => {
                let Some(event) = event else {
                    // The connection task exited on its own (disconnect()
                    // already handled the explicit path); drop the slot.
                    connection = None;
                    continue;
                };

                match event {
                    TransportEvent::Lifecycle(ConnectionEvent::Connected) => {
                        for waiter in connect_waiters.drain(..) {
                            let _ = waiter.send(Ok(()));
                        }
                        if let Some(slot) = connection.as_mut() {
                            let reissued = registry.on_reconnect();
                            for (key, request_id) in reissued {
                                request_keys.insert(request_id, key.clone());
                                send_subscribe(slot, &key, request_id, &token_cache, &config).await;
                            }
                        }
                    }

                    TransportEvent::Lifecycle(ConnectionEvent::Disconnected) => {
                        correlator.fail_all_disconnected();
                    }

                    TransportEvent::Lifecycle(ConnectionEvent::Error { message }) => {
                        tracing::warn!(err = %message, "connection error");
                        let _ = event_tx.send(ClientEvent::Error(ClientError::transport(message.clone())));
                        for waiter in connect_waiters.drain(..) {
                            let _ = waiter.send(Err(ClientError::transport(message.clone())));
                        }
                    }

                    TransportEvent::Message(msg) => {
                        let outcome = Dispatcher::route(
                            msg,
                            &mut correlator,
                            &mut registry,
                            &mut verifier,
                            &mut ordering,
                            &mut resend_coordinator,
                            |rid| request_keys.get(&rid).cloned(),
                        );

                        match outcome {
                            RouteOutcome::Handled => {}
                            RouteOutcome::ProtocolViolation(message) => {
                                tracing::warn!(%message, "protocol violation");
                                let _ = event_tx.send(ClientEvent::Error(ClientError::protocol(message)));
                            }
                            RouteOutcome::IssueGapFill { key, request_id, gap } => {
                                request_keys.insert(request_id, key.clone());
                                if let Some(slot) = connection.as_mut() {
                                    let option = ResendOption::Range {
                                        from: gap.from,
                                        to: gap.to,
                                        publisher_id: Some(gap.chain.publisher_id.clone()),
                                        msg_chain_id: Some(gap.chain.msg_chain_id.clone()),
                                    };
                                    send_resend(slot, &key, request_id, &option, &token_cache, &config).await;
                                }
                            }
                            RouteOutcome::IssueResendRetry { key, request_id, option } => {
                                let delay = resend_coordinator.retry_delay();
                                let fire_tx = self_tx.clone();
                                tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    let _ = fire_tx.send(Command::ResendRetryFire { key, request_id, option });
                                });
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn send_subscribe(
    slot: &mut ConnectionSlot,
    key: &SubscriptionKey,
    request_id: RequestId,
    tokens: &TokenCache,
    config: &ClientConfig,
) {
    let Ok(session_token) = tokens.token(&config.auth).await else {
        tracing::warn!("could not acquire session token for subscribe");
        return;
    };
    let request = ClientRequest::SubscribeRequest {
        stream_id: key.stream_id.clone(),
        stream_partition: key.partition,
        request_id,
        session_token,
    };
    let _ = slot.handle.send(&request);
}

async fn send_unsubscribe(
    slot: &mut ConnectionSlot,
    key: &SubscriptionKey,
    request_id: RequestId,
    tokens: &TokenCache,
    config: &ClientConfig,
) {
    let Ok(session_token) = tokens.token(&config.auth).await else {
        tracing::warn!("could not acquire session token for unsubscribe");
        return;
    };
    let request = ClientRequest::UnsubscribeRequest {
        stream_id: key.stream_id.clone(),
        stream_partition: key.partition,
        request_id,
        session_token,
    };
    let _ = slot.handle.send(&request);
}

async fn send_resend(
    slot: &mut ConnectionSlot,
    key: &SubscriptionKey,
    request_id: RequestId,
    option: &ResendOption,
    tokens: &TokenCache,
    config: &ClientConfig,
) {
    let Ok(session_token) = tokens.token(&config.auth).await else {
        tracing::warn!("could not acquire session token for resend");
        return;
    };
    let request = resend::build_request(key.stream_id.clone(), key.partition, request_id, option, session_token);
    let _ = slot.handle.send(&request);
}

