// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resend request lifecycle: last-N/from-ref/range resends and gap fills
//! (§4.4).
//!
//! This module only decides *what* to send and *what happened*; the actual
//! timers (empty-resend retry delay, gap-fill issuance) are driven by the
//! client run loop, which owns the cancellation tokens those timers race
//! against.

use std::collections::HashMap;
use std::time::Duration;

use crate::message::{ChainKey, MessageRef, Partition, ResendOption, StreamId};
use crate::ordering::Gap;
use crate::subscription::SubscriptionId;
use crate::wire::{ClientRequest, RequestId};

/// Build the `ClientRequest` variant matching a resend option.
pub fn build_request(
    stream_id: StreamId,
    stream_partition: Partition,
    request_id: RequestId,
    option: &ResendOption,
    session_token: String,
) -> ClientRequest {
    match option {
        ResendOption::Last { n } => ClientRequest::ResendLastRequest {
            stream_id,
            stream_partition,
            request_id,
            number_last: *n,
            session_token,
        },
        ResendOption::From { from, publisher_id, msg_chain_id } => ClientRequest::ResendFromRequest {
            stream_id,
            stream_partition,
            request_id,
            from_msg_ref: *from,
            publisher_id: publisher_id.clone(),
            msg_chain_id: msg_chain_id.clone(),
            session_token,
        },
        ResendOption::Range { from, to, publisher_id, msg_chain_id } => ClientRequest::ResendRangeRequest {
            stream_id,
            stream_partition,
            request_id,
            from_msg_ref: *from,
            to_msg_ref: *to,
            publisher_id: publisher_id.clone(),
            msg_chain_id: msg_chain_id.clone(),
            session_token,
        },
    }
}

/// Terminal outcomes a resend request can reach.
#[derive(Debug, Clone)]
pub enum Terminal {
    Resent,
    NoResend,
    Error(String),
}

struct Inflight {
    /// `None` for gap fills, which belong to a partition entry rather than
    /// one Subscription.
    subscription: Option<SubscriptionId>,
    option: ResendOption,
    gap_chain: Option<ChainKey>,
    messages_seen: bool,
    is_retry: bool,
}

/// What the caller must do after a resend request reaches a terminal state.
pub struct Outcome {
    /// `None` for gap fills; route those by `gap_chain` to every member of
    /// the owning partition entry instead.
    pub subscription: Option<SubscriptionId>,
    pub gap_chain: Option<ChainKey>,
    /// Present when the empty-resend retry policy says to reissue the same
    /// request once more (§4.4: "MAY retry once after a bounded
    /// storage-settle delay").
    pub retry: Option<ResendOption>,
}

pub struct ResendCoordinator {
    retry_resend_after: Duration,
    retry_resend_on_empty: bool,
    inflight: HashMap<RequestId, Inflight>,
}

impl ResendCoordinator {
    pub fn new(retry_resend_after: Duration, retry_resend_on_empty: bool) -> Self {
        Self { retry_resend_after, retry_resend_on_empty, inflight: HashMap::new() }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_resend_after
    }

    /// Register a user-initiated (non-gap-fill) resend.
    pub fn start(&mut self, request_id: RequestId, subscription: SubscriptionId, option: ResendOption) {
        self.inflight.insert(
            request_id,
            Inflight {
                subscription: Some(subscription),
                option,
                gap_chain: None,
                messages_seen: false,
                is_retry: false,
            },
        );
    }

    /// Register a retry of a previously empty resend, so it is not retried
    /// again regardless of outcome.
    pub fn start_retry(&mut self, request_id: RequestId, subscription: SubscriptionId, option: ResendOption) {
        self.inflight.insert(
            request_id,
            Inflight {
                subscription: Some(subscription),
                option,
                gap_chain: None,
                messages_seen: false,
                is_retry: true,
            },
        );
    }

    /// Register a gap-fill `ResendRange`, scoped to one chain.
    pub fn start_gap_fill(&mut self, request_id: RequestId, gap: &Gap) {
        let option = ResendOption::Range {
            from: gap.from,
            to: gap.to,
            publisher_id: Some(gap.chain.publisher_id.clone()),
            msg_chain_id: Some(gap.chain.msg_chain_id.clone()),
        };
        self.inflight.insert(
            request_id,
            Inflight {
                subscription: None,
                option,
                gap_chain: Some(gap.chain.clone()),
                messages_seen: false,
                is_retry: false,
            },
        );
    }

    pub fn note_message_seen(&mut self, request_id: RequestId) {
        if let Some(entry) = self.inflight.get_mut(&request_id) {
            entry.messages_seen = true;
        }
    }

    pub fn is_gap_fill(&self, request_id: RequestId) -> bool {
        self.inflight.get(&request_id).is_some_and(|e| e.gap_chain.is_some())
    }

    /// Resolve a terminal response, returning what the caller should do next.
    pub fn finish(&mut self, request_id: RequestId, terminal: Terminal) -> Option<Outcome> {
        let entry = self.inflight.remove(&request_id)?;

        let retry = match (&terminal, &entry.option) {
            (Terminal::NoResend, ResendOption::Last { .. })
                if self.retry_resend_on_empty && !entry.messages_seen && !entry.is_retry =>
            {
                Some(entry.option.clone())
            }
            _ => None,
        };

        Some(Outcome { subscription: entry.subscription, gap_chain: entry.gap_chain, retry })
    }

    pub fn abort_all_for(&mut self, subscription: SubscriptionId) {
        self.inflight.retain(|_, entry| entry.subscription != Some(subscription));
    }
}
