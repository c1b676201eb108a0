// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracks, per `(stream, partition)`, the one broker-side subscription shared
//! by all co-located `Subscription`s (§4.6).

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::message::{ResendOption, SubscriptionKey};
use crate::subscription::{Subscription, SubscriptionEvent, SubscriptionHandle, SubscriptionId, SubState};
use crate::wire::RequestId;

/// The broker-side subscription state for one `(stream, partition)`.
enum BrokerState {
    /// No `SubscribeRequest` has been sent yet.
    None,
    /// A `SubscribeRequest` is outstanding.
    Pending(RequestId),
    /// The broker has acknowledged the subscription.
    Active,
    /// An `UnsubscribeRequest` is outstanding; the entry is removed once it
    /// resolves.
    Unsubscribing(RequestId),
}

struct PartitionEntry {
    broker_state: BrokerState,
    members: Vec<Subscription>,
}

impl PartitionEntry {
    fn new() -> Self {
        Self { broker_state: BrokerState::None, members: Vec::new() }
    }

    fn live_member_count(&self) -> usize {
        self.members.iter().filter(|m| !m.is_historical_only()).count()
    }
}

/// What the caller must do as a result of a `subscribe()` call.
pub enum SubscribeAction {
    /// No broker subscription exists yet; send a `SubscribeRequest` with
    /// this request id.
    IssueSubscribe(RequestId),
    /// A `SubscribeRequest` for this key is already in flight; this member
    /// will be marked `Subscribed` once it resolves.
    JoinPending,
    /// The broker subscription is already active; this member is
    /// immediately `Subscribed`.
    AlreadyActive,
}

/// What the caller must do as a result of an `unsubscribe()` call.
pub enum UnsubscribeAction {
    /// Other members remain on this key; no broker request needed.
    StillActive,
    /// This was the last member; send an `UnsubscribeRequest` with this
    /// request id.
    IssueUnsubscribe(RequestId),
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, PartitionEntry>,
    /// Members that triggered an `UnsubscribeRequest` and are waiting for
    /// the broker's response before their `unsubscribed` event fires.
    pending_unsubscribes: HashMap<RequestId, Subscription>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create a new logical subscription on `key`, joining or starting the
    /// shared broker-side subscription as needed.
    pub fn subscribe(
        &mut self,
        key: SubscriptionKey,
        resend: Option<ResendOption>,
        cancel: CancellationToken,
    ) -> (SubscriptionHandle, SubscribeAction) {
        let id = self.next_subscription_id();
        let (mut sub, handle) = Subscription::new(id, key.clone(), resend, cancel);
        let entry = self.entries.entry(key).or_insert_with(PartitionEntry::new);

        let action = match &entry.broker_state {
            BrokerState::None => {
                let request_id = RequestId::new();
                entry.broker_state = BrokerState::Pending(request_id);
                sub.transition(SubState::Subscribing);
                SubscribeAction::IssueSubscribe(request_id)
            }
            BrokerState::Pending(_) | BrokerState::Unsubscribing(_) => {
                sub.transition(SubState::Subscribing);
                SubscribeAction::JoinPending
            }
            BrokerState::Active => {
                sub.transition(SubState::Subscribed);
                sub.emit(SubscriptionEvent::Subscribed);
                SubscribeAction::AlreadyActive
            }
        };

        entry.members.push(sub);
        (handle, action)
    }

    /// Remove one member from `key`. Returns `None` if no such member
    /// exists (already unsubscribed, or never existed).
    pub fn unsubscribe(&mut self, key: &SubscriptionKey, id: SubscriptionId) -> Option<UnsubscribeAction> {
        let entry = self.entries.get_mut(key)?;
        let pos = entry.members.iter().position(|m| m.id == id)?;
        let mut removed = entry.members.remove(pos);
        removed.transition(SubState::Unsubscribing);

        if entry.members.is_empty() {
            let request_id = RequestId::new();
            entry.broker_state = BrokerState::Unsubscribing(request_id);
            self.pending_unsubscribes.insert(request_id, removed);
            Some(UnsubscribeAction::IssueUnsubscribe(request_id))
        } else {
            removed.transition(SubState::Unsubscribed);
            removed.emit(SubscriptionEvent::Unsubscribed);
            Some(UnsubscribeAction::StillActive)
        }
    }

    /// The broker acknowledged `SubscribeResponse` for `request_id`;
    /// transition every pending member of the matching key to `Subscribed`.
    pub fn on_subscribe_response(&mut self, request_id: RequestId) {
        for entry in self.entries.values_mut() {
            if matches!(&entry.broker_state, BrokerState::Pending(pending) if *pending == request_id) {
                entry.broker_state = BrokerState::Active;
                for member in entry.members.iter_mut() {
                    if member.state == SubState::Subscribing {
                        member.transition(SubState::Subscribed);
                        member.emit(SubscriptionEvent::Subscribed);
                    }
                }
                return;
            }
        }
    }

    /// The broker acknowledged `UnsubscribeResponse` for `request_id`: emit
    /// the removed member's terminal event and drop the now-empty entry.
    pub fn on_unsubscribe_response(&mut self, request_id: RequestId) {
        if let Some(mut removed) = self.pending_unsubscribes.remove(&request_id) {
            removed.transition(SubState::Unsubscribed);
            removed.emit(SubscriptionEvent::Unsubscribed);
        }
        self.entries.retain(|_, entry| {
            !matches!(&entry.broker_state, BrokerState::Unsubscribing(pending) if *pending == request_id)
        });
    }

    /// The broker rejected a still-pending `SubscribeRequest` or
    /// `UnsubscribeRequest` with an `ErrorResponse`. Transitions the
    /// affected member(s) to `Error` and emits `SubscriptionEvent::Error`,
    /// rather than letting the response vanish because neither the
    /// resend coordinator nor any `member_awaiting_resend` lookup knows
    /// about these request ids. Returns `true` if `request_id` matched
    /// anything here.
    pub fn on_error_response(&mut self, request_id: RequestId, message: String) -> bool {
        for entry in self.entries.values_mut() {
            if matches!(&entry.broker_state, BrokerState::Pending(pending) if *pending == request_id) {
                entry.broker_state = BrokerState::None;
                for member in entry.members.iter_mut() {
                    if member.state == SubState::Subscribing {
                        member.transition(SubState::Error);
                        member.emit(SubscriptionEvent::Error(message.clone()));
                    }
                }
                return true;
            }
        }

        if let Some(mut removed) = self.pending_unsubscribes.remove(&request_id) {
            removed.transition(SubState::Error);
            removed.emit(SubscriptionEvent::Error(message));
            self.entries.retain(|_, entry| {
                !matches!(&entry.broker_state, BrokerState::Unsubscribing(pending) if *pending == request_id)
            });
            return true;
        }

        false
    }

    pub fn members_mut(&mut self, key: &SubscriptionKey) -> impl Iterator<Item = &mut Subscription> {
        self.entries.get_mut(key).into_iter().flat_map(|e| e.members.iter_mut())
    }

    pub fn member_mut(&mut self, key: &SubscriptionKey, id: SubscriptionId) -> Option<&mut Subscription> {
        self.entries.get_mut(key)?.members.iter_mut().find(|m| m.id == id)
    }

    /// Find the member awaiting a terminal resend response for `request_id`,
    /// scoped to `key` (unicast frames carry no stream/partition, only a
    /// request id, so the caller must already know which key to look in).
    pub fn member_awaiting_resend(
        &mut self,
        key: &SubscriptionKey,
        request_id: RequestId,
    ) -> Option<&mut Subscription> {
        self.entries
            .get_mut(key)?
            .members
            .iter_mut()
            .find(|m| m.pending_resend_request_ids.contains(&request_id))
    }

    pub fn get_subscriptions(&self, stream_id: &str) -> Vec<&Subscription> {
        self.entries
            .iter()
            .filter(|(key, _)| key.stream_id == stream_id)
            .flat_map(|(_, entry)| entry.members.iter())
            .collect()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.entries.values().map(|e| e.members.len()).sum()
    }

    /// Re-issue one `SubscribeRequest` per partition entry with at least one
    /// live (non-historical-only) member, after a reconnect.
    pub fn on_reconnect(&mut self) -> Vec<(SubscriptionKey, RequestId)> {
        let mut reissued = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if entry.live_member_count() == 0 {
                continue;
            }
            let request_id = RequestId::new();
            entry.broker_state = BrokerState::Pending(request_id);
            for member in entry.members.iter_mut() {
                if !member.is_historical_only() {
                    member.transition(SubState::Subscribing);
                }
            }
            reissued.push((key.clone(), request_id));
        }
        reissued
    }
}
