// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-token acquisition (§1: out-of-scope external collaborator,
//! consumed via a token provider) with single-flight deduplication (§5:
//! "concurrent requesters share one pending fetch").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::{FutureExt, Shared};
use tokio::sync::Mutex;

use crate::config::AuthMethod;
use crate::error::ClientError;

type TokenResult = Result<String, String>;
type TokenFuture = Pin<Box<dyn Future<Output = TokenResult> + Send>>;

/// Resolves an `AuthMethod` into a bearer token. Implementations that need
/// network access (private-key challenge/response, username+password login)
/// are supplied by the embedder; this crate only defines the seam.
pub trait TokenProvider: Send + Sync {
    fn fetch(&self, auth: &AuthMethod) -> TokenFuture;
}

/// A `TokenProvider` for the `sessionToken` / `apiKey` auth variants, which
/// need no round trip — the token is already in hand.
pub struct StaticTokenProvider;

impl TokenProvider for StaticTokenProvider {
    fn fetch(&self, auth: &AuthMethod) -> TokenFuture {
        let result = match auth {
            AuthMethod::SessionToken(token) | AuthMethod::ApiKey(token) => Ok(token.clone()),
            AuthMethod::PrivateKey(_) => {
                Err("privateKey auth requires a custom TokenProvider".to_owned())
            }
            AuthMethod::UsernamePassword { .. } => {
                Err("username+password auth requires a custom TokenProvider".to_owned())
            }
        };
        Box::pin(async move { result })
    }
}

/// Wraps a `TokenProvider` so concurrent callers share one in-flight fetch
/// instead of issuing redundant requests — grounded on the credential
/// broker's single-account-state model (`credential/broker.rs`), simplified
/// to the one behavior this spec actually calls for.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    inflight: Mutex<Option<Shared<TokenFuture>>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider, inflight: Mutex::new(None) }
    }

    /// Fetch the current session token, deduplicating concurrent callers.
    pub async fn token(&self, auth: &AuthMethod) -> Result<String, ClientError> {
        let shared = {
            let mut guard = self.inflight.lock().await;
            match guard.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let shared: Shared<TokenFuture> = self.provider.fetch(auth).shared();
                    *guard = Some(shared.clone());
                    shared
                }
            }
        };

        let result = shared.await;
        // Clear the slot once settled so the next call starts a fresh fetch
        // rather than replaying a stale result forever.
        *self.inflight.lock().await = None;
        result.map_err(ClientError::configuration)
    }
}
