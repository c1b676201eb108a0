// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client library for subscribing to and publishing on real-time data
//! streams over a broker websocket connection: subscription management,
//! message ordering and gap detection, resend requests, and signature
//! verification (§1-§5).

pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod ordering;
pub mod registry;
pub mod resend;
pub mod subscription;
pub mod token;
pub mod verifier;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use client::{Client, ClientEvent, ConnectFn};
pub use config::{AuthMethod, ClientConfig, VerifyMode};
pub use connection::{Connection, ConnectionEvent, TransportEvent};
pub use error::{ClientError, ProtocolError};
pub use message::{
    ChainKey, ContentType, EncryptionType, MessageId, MessageRef, Partition, PublisherId,
    ResendOption, SignatureType, StreamId, StreamMessage, SubscriptionKey,
};
pub use subscription::{Delivery, SubscriptionEvent, SubscriptionHandle, SubscriptionId};
pub use token::{StaticTokenProvider, TokenProvider};
pub use verifier::{AlwaysRequireSignature, StreamRequirement};
pub use wire::{ClientRequest, RequestId, ServerMessage};
