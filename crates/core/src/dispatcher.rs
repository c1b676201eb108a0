// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routes inbound broker frames to the RequestCorrelator, the matching
//! Subscription(s), the verifier, and the ordering tracker (§4.7).

use crate::correlator::RequestCorrelator;
use crate::message::{ResendOption, SubscriptionKey};
use crate::ordering::{Gap, Outcome as OrderingOutcome, OrderingTracker};
use crate::registry::SubscriptionRegistry;
use crate::resend::{ResendCoordinator, Terminal};
use crate::subscription::{Delivery, SubState, SubscriptionEvent};
use crate::verifier::MessageVerifier;
use crate::wire::{RequestId, ServerMessage};

/// What the client run loop must do as a result of routing one inbound
/// frame. The Dispatcher never touches the connection directly; it reports
/// what to send next.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Nothing further to do; the frame was fully handled in-place.
    Handled,
    /// Issue a `ResendRange` to fill a newly detected gap.
    IssueGapFill { key: SubscriptionKey, request_id: RequestId, gap: Gap },
    /// Re-issue the empty-resend retry built by the ResendCoordinator.
    IssueResendRetry { key: SubscriptionKey, request_id: RequestId, option: ResendOption },
    /// The frame could not be attributed to any waiter or subscription.
    ProtocolViolation(String),
}

pub struct Dispatcher;

impl Dispatcher {
    /// Route one decoded inbound frame. `key_of_request` recovers the
    /// `SubscriptionKey` a resend request id belongs to, since unicast and
    /// resend-response frames carry no stream/partition of their own.
    pub fn route(
        msg: ServerMessage,
        correlator: &mut RequestCorrelator,
        registry: &mut SubscriptionRegistry,
        verifier: &mut MessageVerifier,
        ordering: &mut OrderingTracker,
        resend: &mut ResendCoordinator,
        key_of_request: impl Fn(RequestId) -> Option<SubscriptionKey>,
    ) -> RouteOutcome {
        // Resolve any one-shot waiter registered directly against the
        // correlator (e.g. a caller awaiting the very first SubscribeResponse)
        // before the type-specific routing below.
        correlator.on_inbound(&msg);

        match msg {
            ServerMessage::BroadcastMessage { stream_message } => {
                let key = stream_message.subscription_key();

                let verified = match verifier.verify(&stream_message) {
                    Ok(v) => v,
                    Err(e) => return RouteOutcome::ProtocolViolation(e.to_string()),
                };

                match ordering.observe(&stream_message) {
                    OrderingOutcome::Drop => RouteOutcome::Handled,
                    OrderingOutcome::Deliver => {
                        for member in registry.members_mut(&key) {
                            let delivery =
                                Delivery { message: stream_message.clone(), verified: verified.clone() };
                            if member.state == SubState::Resending {
                                // Held until the resend's terminal response, per
                                // the combined subscribe+resend ordering rule.
                                member.buffer_live(delivery, None);
                            } else {
                                member.deliver(delivery);
                            }
                        }
                        RouteOutcome::Handled
                    }
                    OrderingOutcome::DeliverWithGap(gap) => {
                        for member in registry.members_mut(&key) {
                            let delivery =
                                Delivery { message: stream_message.clone(), verified: verified.clone() };
                            let gap_event = SubscriptionEvent::Gap {
                                from: gap.from,
                                to: gap.to,
                                publisher_id: gap.chain.publisher_id.clone(),
                                msg_chain_id: gap.chain.msg_chain_id.clone(),
                            };
                            if member.state == SubState::Resending {
                                member.buffer_live(delivery, Some(gap_event));
                            } else {
                                member.deliver(delivery);
                                member.emit(gap_event);
                            }
                        }
                        let request_id = RequestId::new();
                        resend.start_gap_fill(request_id, &gap);
                        RouteOutcome::IssueGapFill { key, request_id, gap }
                    }
                }
            }

            ServerMessage::UnicastMessage { request_id, stream_message } => {
                let Some(key) = key_of_request(request_id) else {
                    return RouteOutcome::ProtocolViolation(format!(
                        "Received unexpected UnicastMessage for unknown request {request_id}"
                    ));
                };

                resend.note_message_seen(request_id);

                let verified = match verifier.verify(&stream_message) {
                    Ok(v) => v,
                    Err(e) => return RouteOutcome::ProtocolViolation(e.to_string()),
                };

                if resend.is_gap_fill(request_id) {
                    // Filler traffic never triggers nested gap detection.
                    ordering.observe_as_filler(&stream_message);
                    for member in registry.members_mut(&key) {
                        member.deliver(Delivery { message: stream_message.clone(), verified: verified.clone() });
                    }
                    RouteOutcome::Handled
                } else if let Some(member) = registry.member_awaiting_resend(&key, request_id) {
                    // A regular (non-gap-fill) resend advances the same
                    // chain-wide tracker the live feed uses, so any seam gap
                    // between the resend's last message and the first live
                    // message is detected by the ordinary DeliverWithGap path
                    // instead of needing its own seam-gap bookkeeping here.
                    ordering.observe_as_filler(&stream_message);
                    member.deliver(Delivery { message: stream_message, verified });
                    RouteOutcome::Handled
                } else {
                    RouteOutcome::ProtocolViolation(format!(
                        "Received unexpected UnicastMessage for request {request_id}: matched no waiting subscription"
                    ))
                }
            }

            ServerMessage::SubscribeResponse { request_id, .. } => {
                registry.on_subscribe_response(request_id);
                RouteOutcome::Handled
            }

            ServerMessage::UnsubscribeResponse { request_id, .. } => {
                registry.on_unsubscribe_response(request_id);
                RouteOutcome::Handled
            }

            ServerMessage::ResendResponseResending { request_id, .. } => {
                if let Some(key) = key_of_request(request_id) {
                    if let Some(member) = registry.member_awaiting_resend(&key, request_id) {
                        member.transition(SubState::Resending);
                        member.emit(SubscriptionEvent::Resending);
                    }
                }
                RouteOutcome::Handled
            }

            ServerMessage::ResendResponseResent { request_id, .. } => {
                Self::finish_resend(request_id, Terminal::Resent, registry, resend, ordering, &key_of_request)
            }

            ServerMessage::ResendResponseNoResend { request_id, .. } => {
                Self::finish_resend(request_id, Terminal::NoResend, registry, resend, ordering, &key_of_request)
            }

            ServerMessage::ErrorResponse { request_id, error_code, error_message } => {
                if let Some(rid) = request_id {
                    // A Subscribe/UnsubscribeRequest id never enters the
                    // resend coordinator's inflight map, so it must be
                    // checked against the registry first or the error is
                    // silently dropped as RouteOutcome::Handled below.
                    if registry.on_error_response(rid, error_message.clone()) {
                        return RouteOutcome::Handled;
                    }
                    return Self::finish_resend(
                        rid,
                        Terminal::Error(error_message.clone()),
                        registry,
                        resend,
                        ordering,
                        &key_of_request,
                    );
                }
                RouteOutcome::ProtocolViolation(format!("{error_code}: {error_message}"))
            }
        }
    }

    fn finish_resend(
        request_id: RequestId,
        terminal: Terminal,
        registry: &mut SubscriptionRegistry,
        resend: &mut ResendCoordinator,
        ordering: &mut OrderingTracker,
        key_of_request: &impl Fn(RequestId) -> Option<SubscriptionKey>,
    ) -> RouteOutcome {
        let Some(outcome) = resend.finish(request_id, terminal.clone()) else {
            return RouteOutcome::Handled;
        };

        let Some(key) = key_of_request(request_id) else {
            return RouteOutcome::Handled;
        };

        if let Some(chain) = &outcome.gap_chain {
            if let Terminal::Error(message) = &terminal {
                tracing::warn!(%message, key = %key, "gap-fill resend failed");
            }
            if let Some(follow_up) = ordering.mark_gap_resolved(chain) {
                let follow_request_id = RequestId::new();
                resend.start_gap_fill(follow_request_id, &follow_up);
                return RouteOutcome::IssueGapFill { key, request_id: follow_request_id, gap: follow_up };
            }
            return RouteOutcome::Handled;
        }

        if let Some(member) = registry.member_awaiting_resend(&key, request_id) {
            member.pending_resend_request_ids.remove(&request_id);
            match &terminal {
                Terminal::Resent => member.emit(SubscriptionEvent::Resent),
                Terminal::NoResend => member.emit(SubscriptionEvent::NoResend),
                Terminal::Error(message) => member.emit(SubscriptionEvent::Error(message.clone())),
            }

            match &terminal {
                Terminal::Error(_) => member.transition(SubState::Error),
                Terminal::Resent | Terminal::NoResend => {
                    // A Range resend has no live counterpart; anything else
                    // resumes ordinary live delivery, flushing whatever
                    // arrived while this resend was in flight.
                    let next_state = if matches!(member.resend, Some(ResendOption::Range { .. })) {
                        SubState::ResendDone
                    } else {
                        SubState::Subscribed
                    };
                    member.transition(next_state);
                    for buffered in member.drain_live_buffer() {
                        member.deliver(buffered.delivery);
                        if let Some(gap_event) = buffered.gap {
                            member.emit(gap_event);
                        }
                    }
                }
            }
        }

        if let Some(retry_option) = outcome.retry {
            let retry_request_id = RequestId::new();
            if let Some(subscription) = outcome.subscription {
                resend.start_retry(retry_request_id, subscription, retry_option.clone());
            }
            return RouteOutcome::IssueResendRetry { key, request_id: retry_request_id, option: retry_option };
        }

        RouteOutcome::Handled
    }
}
