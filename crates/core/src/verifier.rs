// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signature verification with per-delivery memoization (§4.2).
//!
//! Verification itself is CPU-bound and synchronous (`ring`), so a pending
//! verification collapses to a plain `bool` rather than a future. What
//! actually needs preserving is sharing: when one delivery fans out to N
//! subscriptions, the check must run once and all N must see the same
//! result. `VerificationCache` keys by message identity and hands out
//! `Arc<bool>` so every subscriber holds a reference to the one computed
//! result; entries are pruned once no subscriber holds a reference, via
//! `Weak` rather than an explicit refcount.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ring::signature::{self, UnparsedPublicKey};

use crate::config::VerifyMode;
use crate::error::ClientError;
use crate::message::{MessageId, StreamMessage};

/// Identifies one delivered message for memoization purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DeliveryKey {
    stream_id: String,
    partition: u32,
    publisher_id: String,
    msg_chain_id: String,
    timestamp: u64,
    sequence_number: u32,
}

impl From<&MessageId> for DeliveryKey {
    fn from(id: &MessageId) -> Self {
        Self {
            stream_id: id.stream_id.clone(),
            partition: id.partition,
            publisher_id: id.publisher_id.clone(),
            msg_chain_id: id.msg_chain_id.clone(),
            timestamp: id.timestamp,
            sequence_number: id.sequence_number,
        }
    }
}

/// Returns whether a given stream currently requires signatures. Stream
/// metadata lookup is out of scope for this crate (§1); `auto` mode is
/// implemented in terms of this trait so an embedder can plug in the real
/// metadata source.
pub trait StreamRequirement: Send + Sync {
    fn requires_signature(&self, stream_id: &str) -> bool;
}

/// Default `StreamRequirement` that always requires signatures; appropriate
/// when the embedder has no metadata source and prefers the conservative
/// default.
pub struct AlwaysRequireSignature;

impl StreamRequirement for AlwaysRequireSignature {
    fn requires_signature(&self, _stream_id: &str) -> bool {
        true
    }
}

pub struct MessageVerifier {
    mode: VerifyMode,
    requirement: Arc<dyn StreamRequirement>,
    cache: HashMap<DeliveryKey, Weak<bool>>,
}

impl MessageVerifier {
    pub fn new(mode: VerifyMode, requirement: Arc<dyn StreamRequirement>) -> Self {
        Self { mode, requirement, cache: HashMap::new() }
    }

    /// Verify (or fetch the memoized result for) one delivered message.
    ///
    /// Returns an `Arc<bool>` so callers can retain the result alongside the
    /// message without re-running the check; the cache entry disappears once
    /// every such `Arc` is dropped.
    pub fn verify(&mut self, msg: &StreamMessage) -> Result<Arc<bool>, ClientError> {
        let key = DeliveryKey::from(&msg.message_id);

        if let Some(existing) = self.cache.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let should_verify = match self.mode {
            VerifyMode::Never => false,
            VerifyMode::Always => true,
            VerifyMode::Auto => self.requirement.requires_signature(&msg.message_id.stream_id),
        };

        let result = if should_verify { verify_signature(msg)? } else { true };
        let arc = Arc::new(result);
        self.cache.insert(key, Arc::downgrade(&arc));
        Ok(arc)
    }
}

/// Build the canonical payload-to-sign per §4.2 and check it against
/// `msg.signature` under `msg.message_id.publisher_id`.
fn verify_signature(msg: &StreamMessage) -> Result<bool, ClientError> {
    let payload = canonical_payload(msg);

    let publisher_bytes = hex_decode(&msg.message_id.publisher_id)
        .map_err(|e| ClientError::protocol(format!("invalid publisherId hex: {e}")))?;

    let public_key = UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &publisher_bytes);
    Ok(public_key.verify(&payload, &msg.signature).is_ok())
}

/// Canonical concatenation: streamId, partition, timestamp, sequenceNumber,
/// publisherId (lowercased), msgChainId, optionally prevMsgRef, then content.
fn canonical_payload(msg: &StreamMessage) -> Vec<u8> {
    let id = &msg.message_id;
    let mut out = Vec::with_capacity(64 + msg.content.len());
    out.extend_from_slice(id.stream_id.as_bytes());
    out.extend_from_slice(id.partition.to_string().as_bytes());
    out.extend_from_slice(id.timestamp.to_string().as_bytes());
    out.extend_from_slice(id.sequence_number.to_string().as_bytes());
    out.extend_from_slice(id.publisher_id.to_lowercase().as_bytes());
    out.extend_from_slice(id.msg_chain_id.as_bytes());
    if let Some(prev) = msg.prev_msg_ref {
        out.extend_from_slice(prev.timestamp.to_string().as_bytes());
        out.extend_from_slice(prev.sequence_number.to_string().as_bytes());
    }
    out.extend_from_slice(&msg.content);
    out
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 != 0 {
        return Err("odd-length hex string".to_owned());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}
