// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound/outbound control message types (§6).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{MessageRef, MsgChainId, Partition, PublisherId, StreamId, StreamMessage};

/// Opaque client-generated token correlating a request with its response(s).
///
/// A newtype over `Uuid` rather than an ambient counter: unique per client,
/// not per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound requests the core sends to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    SubscribeRequest { stream_id: StreamId, stream_partition: Partition, request_id: RequestId, session_token: String },
    UnsubscribeRequest { stream_id: StreamId, stream_partition: Partition, request_id: RequestId, session_token: String },
    ResendLastRequest {
        stream_id: StreamId,
        stream_partition: Partition,
        request_id: RequestId,
        number_last: u64,
        session_token: String,
    },
    ResendFromRequest {
        stream_id: StreamId,
        stream_partition: Partition,
        request_id: RequestId,
        from_msg_ref: MessageRef,
        publisher_id: Option<PublisherId>,
        msg_chain_id: Option<MsgChainId>,
        session_token: String,
    },
    ResendRangeRequest {
        stream_id: StreamId,
        stream_partition: Partition,
        request_id: RequestId,
        from_msg_ref: MessageRef,
        to_msg_ref: MessageRef,
        publisher_id: Option<PublisherId>,
        msg_chain_id: Option<MsgChainId>,
        session_token: String,
    },
}

impl ClientRequest {
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::SubscribeRequest { request_id, .. }
            | Self::UnsubscribeRequest { request_id, .. }
            | Self::ResendLastRequest { request_id, .. }
            | Self::ResendFromRequest { request_id, .. }
            | Self::ResendRangeRequest { request_id, .. } => *request_id,
        }
    }
}

/// Inbound messages received from the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SubscribeResponse { request_id: RequestId, stream_id: StreamId, stream_partition: Partition },
    UnsubscribeResponse { request_id: RequestId, stream_id: StreamId, stream_partition: Partition },
    ResendResponseResending { request_id: RequestId, stream_id: StreamId, stream_partition: Partition },
    ResendResponseResent { request_id: RequestId, stream_id: StreamId, stream_partition: Partition },
    ResendResponseNoResend { request_id: RequestId, stream_id: StreamId, stream_partition: Partition },
    BroadcastMessage { stream_message: StreamMessage },
    UnicastMessage { request_id: RequestId, stream_message: StreamMessage },
    ErrorResponse { request_id: Option<RequestId>, error_code: String, error_message: String },
}

impl ServerMessage {
    /// The correlating request id, if this message type carries one.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::SubscribeResponse { request_id, .. }
            | Self::UnsubscribeResponse { request_id, .. }
            | Self::ResendResponseResending { request_id, .. }
            | Self::ResendResponseResent { request_id, .. }
            | Self::ResendResponseNoResend { request_id, .. }
            | Self::UnicastMessage { request_id, .. } => Some(*request_id),
            Self::ErrorResponse { request_id, .. } => *request_id,
            Self::BroadcastMessage { .. } => None,
        }
    }

    /// A short discriminant name, used for correlator "expected type" matching
    /// and for log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SubscribeResponse { .. } => "subscribe_response",
            Self::UnsubscribeResponse { .. } => "unsubscribe_response",
            Self::ResendResponseResending { .. } => "resend_response_resending",
            Self::ResendResponseResent { .. } => "resend_response_resent",
            Self::ResendResponseNoResend { .. } => "resend_response_no_resend",
            Self::BroadcastMessage { .. } => "broadcast_message",
            Self::UnicastMessage { .. } => "unicast_message",
            Self::ErrorResponse { .. } => "error_response",
        }
    }
}
