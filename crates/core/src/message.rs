// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire data model: stream messages, ordering keys, and resend selectors.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A stream identifier. Streams are free-form names assigned by the broker's
/// metadata layer (out of scope here); the core treats them as opaque keys.
pub type StreamId = String;

/// A stream partition index.
pub type Partition = u32;

/// Hex-encoded publisher identity (e.g. an Ethereum-style address).
pub type PublisherId = String;

/// A publisher's chain identifier within a partition.
pub type MsgChainId = String;

/// The ordering key within a chain: `(timestamp, sequenceNumber)`.
///
/// Total order is lexicographic: timestamp first, then sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub timestamp: u64,
    pub sequence_number: u32,
}

impl MessageRef {
    pub fn new(timestamp: u64, sequence_number: u32) -> Self {
        Self { timestamp, sequence_number }
    }

    /// The next ref in the same chain, keeping timestamp and incrementing sequence.
    pub fn successor(&self) -> Self {
        Self { timestamp: self.timestamp, sequence_number: self.sequence_number + 1 }
    }

    /// The previous ref in the same chain, keeping timestamp and decrementing sequence.
    ///
    /// Saturates at 0 rather than panicking; a chain origin message never has a
    /// `prevMsgRef`, so `predecessor` is only called on refs already known `> 0`.
    pub fn predecessor(&self) -> Self {
        Self { timestamp: self.timestamp, sequence_number: self.sequence_number.saturating_sub(1) }
    }
}

impl PartialOrd for MessageRef {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageRef {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.timestamp, self.sequence_number).cmp(&(other.timestamp, other.sequence_number))
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.sequence_number)
    }
}

/// Full identity of a delivered message: the stream coordinate plus ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub stream_id: StreamId,
    pub partition: Partition,
    pub timestamp: u64,
    pub sequence_number: u32,
    pub publisher_id: PublisherId,
    pub msg_chain_id: MsgChainId,
}

impl MessageId {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef::new(self.timestamp, self.sequence_number)
    }

    /// The `(stream, partition, publisher, chain)` tuple that identifies an ordering chain.
    pub fn chain_key(&self) -> ChainKey {
        ChainKey {
            stream_id: self.stream_id.clone(),
            partition: self.partition,
            publisher_id: self.publisher_id.clone(),
            msg_chain_id: self.msg_chain_id.clone(),
        }
    }
}

/// `(streamId, partition, publisherId, msgChainId)` — the unit OrderingTracker tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainKey {
    pub stream_id: StreamId,
    pub partition: Partition,
    pub publisher_id: PublisherId,
    pub msg_chain_id: MsgChainId,
}

/// The content/encoding/signature metadata describing how a message was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Json,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    None,
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Secp256k1,
}

/// An immutable signed record delivered on a stream partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub message_id: MessageId,
    /// `None` only at the origin of a chain.
    pub prev_msg_ref: Option<MessageRef>,
    #[serde(with = "bytes_as_base64")]
    pub content: Bytes,
    pub content_type: ContentType,
    pub encryption_type: EncryptionType,
    pub signature_type: SignatureType,
    #[serde(with = "bytes_as_base64")]
    pub signature: Bytes,
}

impl StreamMessage {
    pub fn message_ref(&self) -> MessageRef {
        self.message_id.message_ref()
    }

    pub fn subscription_key(&self) -> SubscriptionKey {
        SubscriptionKey {
            stream_id: self.message_id.stream_id.clone(),
            partition: self.message_id.partition,
        }
    }
}

/// `(streamId, streamPartition)` — the unit of broker-side subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub stream_id: StreamId,
    pub partition: Partition,
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.stream_id, self.partition)
    }
}

/// At most one resend mode applies per subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResendOption {
    Last { n: u64 },
    From { from: MessageRef, publisher_id: Option<PublisherId>, msg_chain_id: Option<MsgChainId> },
    Range {
        from: MessageRef,
        to: MessageRef,
        publisher_id: Option<PublisherId>,
        msg_chain_id: Option<MsgChainId>,
    },
}

/// Serialize/deserialize `bytes::Bytes` as base64 text, matching the wire's
/// JSON-object framing for binary payloads.
mod bytes_as_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text.as_bytes()).map(Bytes::from).map_err(serde::de::Error::custom)
    }
}
