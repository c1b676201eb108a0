// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-subscription state machine and user-facing event/message queues
//! (§3, §4.5).

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::message::{ChainKey, MessageRef, ResendOption, StreamMessage, SubscriptionKey};
use crate::wire::RequestId;

/// Opaque identity for one logical subscription (a `subscribe()` call),
/// distinct from the broker-side `SubscriptionKey` that many logical
/// subscriptions may share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// States in the subscription lifecycle (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    Pending,
    Subscribing,
    Subscribed,
    Resending,
    ResendDone,
    Unsubscribing,
    Unsubscribed,
    Error,
}

/// Events emitted to the user over the subscription's event channel.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Subscribed,
    Unsubscribed,
    Resending,
    Resent,
    NoResend,
    Gap { from: MessageRef, to: MessageRef, publisher_id: String, msg_chain_id: String },
    Done,
    Error(String),
}

/// A delivered message plus its shared verification result.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: StreamMessage,
    pub verified: Arc<bool>,
}

/// A live-feed delivery held back while this subscription is `Resending`
/// (§4.4: combined subscribe+resend), replayed in arrival order once the
/// resend reaches a terminal response.
#[derive(Debug, Clone)]
pub struct BufferedLive {
    pub delivery: Delivery,
    pub gap: Option<SubscriptionEvent>,
}

/// One logical subscription: a user-facing handle's server-side counterpart.
///
/// Owned by the `SubscriptionRegistry`'s `PartitionEntry`. Holds its own
/// resend policy, delivery channel, and event channel — never the broker
/// connection or other subscriptions' state.
pub struct Subscription {
    pub id: SubscriptionId,
    pub key: SubscriptionKey,
    pub resend: Option<ResendOption>,
    pub state: SubState,
    /// Chains with a gap-fill currently in flight, to avoid duplicate fills
    /// at the subscription layer mirroring the tracker's own rate limit.
    pub gap_fill_in_progress: HashSet<ChainKey>,
    /// Resend request ids this subscription is waiting on a terminal
    /// response for.
    pub pending_resend_request_ids: HashSet<RequestId>,
    /// Live messages received while `state == Resending`, held for replay
    /// once the resend completes.
    live_buffer: Vec<BufferedLive>,
    deliveries_tx: mpsc::UnboundedSender<Delivery>,
    events_tx: mpsc::UnboundedSender<SubscriptionEvent>,
    /// True once `unsubscribed` has been emitted; guards against double
    /// delivery/double-emit invariants (§8: invariants 5, idempotence).
    terminated: bool,
}

/// The user-facing half: receivers for messages and lifecycle events, plus
/// a cancellation handle.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub key: SubscriptionKey,
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
    pub events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    pub cancel: tokio_util::sync::CancellationToken,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        key: SubscriptionKey,
        resend: Option<ResendOption>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> (Self, SubscriptionHandle) {
        let (deliveries_tx, deliveries) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let sub = Self {
            id,
            key: key.clone(),
            resend,
            state: SubState::Pending,
            gap_fill_in_progress: HashSet::new(),
            pending_resend_request_ids: HashSet::new(),
            live_buffer: Vec::new(),
            deliveries_tx,
            events_tx,
            terminated: false,
        };
        let handle = SubscriptionHandle { id, key, deliveries, events, cancel };
        (sub, handle)
    }

    pub fn transition(&mut self, next: SubState) {
        tracing::debug!(
            subscription = ?self.id,
            key = %self.key,
            from = ?self.state,
            to = ?next,
            "subscription state transition"
        );
        self.state = next;
    }

    /// Deliver a verified message to the user, unless this subscription has
    /// already emitted `unsubscribed` (§8 invariant 5).
    pub fn deliver(&self, delivery: Delivery) {
        if self.terminated {
            return;
        }
        let _ = self.deliveries_tx.send(delivery);
    }

    pub fn emit(&mut self, event: SubscriptionEvent) {
        if self.terminated {
            return;
        }
        if matches!(event, SubscriptionEvent::Unsubscribed) {
            self.terminated = true;
        }
        let _ = self.events_tx.send(event);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Hold a live delivery (and its gap event, if any) for replay once this
    /// subscription's in-flight resend resolves.
    pub fn buffer_live(&mut self, delivery: Delivery, gap: Option<SubscriptionEvent>) {
        self.live_buffer.push(BufferedLive { delivery, gap });
    }

    /// Take every buffered live delivery, in arrival order.
    pub fn drain_live_buffer(&mut self) -> Vec<BufferedLive> {
        std::mem::take(&mut self.live_buffer)
    }

    /// True if this subscription's resend is "one-shot historical" — a
    /// bounded resend with no live component, per §4.6/§5: not replayed on
    /// reconnect once its resend has completed.
    pub fn is_historical_only(&self) -> bool {
        matches!(self.resend, Some(ResendOption::Range { .. })) && self.state == SubState::ResendDone
    }
}
