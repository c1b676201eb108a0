// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures, compiled only under `#[cfg(test)]`.

use bytes::Bytes;

use crate::message::{ContentType, EncryptionType, MessageId, SignatureType, StreamMessage};

/// A minimal, unsigned `StreamMessage` on stream `"s1"` partition 0, chain
/// `"chain1"`/publisher `"pub1"`, at the given ordering position.
pub fn sample_message(timestamp: u64, sequence_number: u32) -> StreamMessage {
    StreamMessage {
        message_id: MessageId {
            stream_id: "s1".to_owned(),
            partition: 0,
            timestamp,
            sequence_number,
            publisher_id: "pub1".to_owned(),
            msg_chain_id: "chain1".to_owned(),
        },
        prev_msg_ref: None,
        content: Bytes::from_static(b"payload"),
        content_type: ContentType::Json,
        encryption_type: EncryptionType::None,
        signature_type: SignatureType::Secp256k1,
        signature: Bytes::new(),
    }
}
