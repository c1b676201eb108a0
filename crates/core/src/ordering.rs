// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-chain gap detection on the real-time feed (§4.3).

use std::collections::HashMap;

use crate::message::{ChainKey, MessageRef, StreamMessage};

/// A detected gap, inclusive on both ends, to be filled by `ResendRange`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub chain: ChainKey,
    pub from: MessageRef,
    pub to: MessageRef,
}

/// What happened when a real-time message was fed to the tracker.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Deliver the message; no gap.
    Deliver,
    /// Deliver the message; a gap precedes it. The gap may be suppressed if
    /// one is already in flight for this chain (§4.3 rate limit) — in that
    /// case the tracker records an extended pending range instead and
    /// returns `Deliver` with `None` gap-emission obligation, surfaced via
    /// `coalesced`.
    DeliverWithGap(Gap),
    /// Duplicate or out-of-date; drop silently.
    Drop,
}

#[derive(Default)]
struct ChainState {
    last_ref: Option<MessageRef>,
    /// Coverage range still owed once the in-flight gap-fill completes.
    pending_extension: Option<(MessageRef, MessageRef)>,
    gap_in_flight: bool,
}

/// Tracks `lastRef` per `(stream, partition, publisher, chain)` and detects
/// gaps on the real-time feed, rate-limited to one outstanding fill per
/// chain (§4.3).
#[derive(Default)]
pub struct OrderingTracker {
    chains: HashMap<ChainKey, ChainState>,
}

impl OrderingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one real-time message. The caller is responsible for actually
    /// issuing a resend when `Outcome::DeliverWithGap` is returned and for
    /// calling `mark_gap_resolved` once that resend's terminal response
    /// arrives.
    pub fn observe(&mut self, msg: &StreamMessage) -> Outcome {
        let key = msg.message_id.chain_key();
        let msg_ref = msg.message_ref();
        let state = self.chains.entry(key.clone()).or_default();

        let Some(last_ref) = state.last_ref else {
            state.last_ref = Some(msg_ref);
            return Outcome::Deliver;
        };

        if msg.prev_msg_ref == Some(last_ref) {
            state.last_ref = Some(msg_ref);
            return Outcome::Deliver;
        }

        if msg_ref <= last_ref {
            return Outcome::Drop;
        }

        // Gap: msg arrived with either no prevMsgRef or a prevMsgRef that
        // doesn't chain from what we last saw.
        let gap_to = msg.prev_msg_ref.map(|r| r.predecessor()).unwrap_or(msg_ref.predecessor());
        let gap_from = last_ref.successor();
        state.last_ref = Some(msg_ref);

        if state.gap_in_flight {
            // Coalesce: extend the pending range rather than re-emitting.
            let (existing_from, existing_to) =
                state.pending_extension.unwrap_or((gap_from, gap_to));
            let extended_to = existing_to.max(gap_to);
            state.pending_extension = Some((existing_from, extended_to));
            return Outcome::Deliver;
        }

        state.gap_in_flight = true;
        Outcome::DeliverWithGap(Gap { chain: key, from: gap_from, to: gap_to })
    }

    /// Apply a message delivered as part of a gap-fill resend, without
    /// triggering nested gap detection (§4.4: "never generate nested gap
    /// requests until completion").
    pub fn observe_as_filler(&mut self, msg: &StreamMessage) {
        let key = msg.message_id.chain_key();
        let state = self.chains.entry(key).or_default();
        let msg_ref = msg.message_ref();
        let should_advance = match state.last_ref {
            Some(last) => msg_ref > last,
            None => true,
        };
        if should_advance {
            state.last_ref = Some(msg_ref);
        }
    }

    /// Mark the in-flight gap-fill for `chain` complete. If a coalesced
    /// extension was recorded while it was in flight, return the one
    /// follow-up gap to re-issue; otherwise `None`.
    pub fn mark_gap_resolved(&mut self, chain: &ChainKey) -> Option<Gap> {
        let state = self.chains.get_mut(chain)?;
        state.gap_in_flight = false;
        let (from, to) = state.pending_extension.take()?;
        state.gap_in_flight = true;
        Some(Gap { chain: chain.clone(), from, to })
    }

    #[cfg(test)]
    fn last_ref(&self, chain: &ChainKey) -> Option<MessageRef> {
        self.chains.get(chain).and_then(|s| s.last_ref)
    }
}
