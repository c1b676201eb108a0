// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps outstanding request ids to pending waiters (§4.1).
//!
//! Owned exclusively by the client's single run-loop task (see `client.rs`);
//! no internal locking. A waiter is resolved by handing its settlement to a
//! `tokio::sync::oneshot` sender held by whichever caller is awaiting the
//! response, generalized from a single response to a closed set of
//! "expected" response types per request.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::wire::{RequestId, ServerMessage};

/// A waiter registered for one outstanding request.
struct Waiter {
    expected: Vec<&'static str>,
    resolver: oneshot::Sender<Result<ServerMessage, ClientError>>,
}

/// Resolves pending requests against inbound responses, keyed by `request_id`.
#[derive(Default)]
pub struct RequestCorrelator {
    waiters: HashMap<RequestId, Waiter>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`. Returns the receiver half; the
    /// caller awaits it to get the correlated response or an error.
    pub fn register(
        &mut self,
        request_id: RequestId,
        expected: Vec<&'static str>,
    ) -> oneshot::Receiver<Result<ServerMessage, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id, Waiter { expected, resolver: tx });
        rx
    }

    /// Feed an inbound message. Returns `true` if it matched and resolved (or
    /// rejected) a waiter, `false` if no waiter was interested (the caller
    /// should then route the message as an unsolicited delivery instead).
    pub fn on_inbound(&mut self, msg: &ServerMessage) -> bool {
        let Some(request_id) = msg.request_id() else { return false };
        let Some(waiter) = self.waiters.get(&request_id) else { return false };

        if let ServerMessage::ErrorResponse { error_code, error_message, .. } = msg {
            // Any ErrorResponse with a matching request id rejects the waiter,
            // regardless of the waiter's expected success types (§4.1).
            if let Some(waiter) = self.waiters.remove(&request_id) {
                let _ = waiter.resolver.send(Err(ClientError::RequestFailed {
                    code: error_code.clone(),
                    message: error_message.clone(),
                }));
            }
            return true;
        }

        if waiter.expected.contains(&msg.type_name()) {
            if let Some(waiter) = self.waiters.remove(&request_id) {
                let _ = waiter.resolver.send(Ok(msg.clone()));
            }
            return true;
        }

        false
    }

    /// Reject every outstanding waiter with `Disconnected` (modeled as a
    /// `Transport` error), draining the map.
    pub fn fail_all_disconnected(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.resolver.send(Err(ClientError::transport("disconnected")));
        }
    }

    /// Reject and remove a single waiter, e.g. on cancellation.
    pub fn abort(&mut self, request_id: RequestId) {
        if let Some(waiter) = self.waiters.remove(&request_id) {
            let _ = waiter.resolver.send(Err(ClientError::Aborted));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}
