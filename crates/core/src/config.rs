// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-wide configuration (§6: "Configuration options").

use std::time::Duration;

use crate::error::ClientError;

/// Signature verification policy (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Skip verification; `verify()` always resolves `true`.
    Never,
    /// Verify only when the stream requires signatures.
    #[default]
    Auto,
    /// Always verify.
    Always,
}

impl VerifyMode {
    pub fn parse(s: &str) -> Result<Self, ClientError> {
        match s {
            "never" => Ok(Self::Never),
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            other => Err(ClientError::configuration(format!(
                "unknown verifySignatures mode: {other}"
            ))),
        }
    }
}

/// Credential resolution for authenticated wire requests.
///
/// Exactly one variant is supplied; `TokenProvider` implementations resolve
/// whichever is present into a bearer token. Acquisition itself (exchanging a
/// private key or username/password for a session token) is out of scope for
/// this crate — see `crate::token`.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    SessionToken(String),
    PrivateKey(String),
    ApiKey(String),
    UsernamePassword { username: String, password: String },
}

/// Client-wide configuration, analogous to `MuxConfig` but consumed by an
/// embedding application rather than parsed from argv (see `main.rs` for the
/// CLI-facing mapping).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// If true, `subscribe()` implicitly connects when not yet connected.
    pub auto_connect: bool,
    /// If true, the last `unsubscribe()` triggers a disconnect.
    pub auto_disconnect: bool,
    pub verify_signatures: VerifyMode,
    /// Storage-settle delay before an empty `last: N` resend is retried once.
    pub retry_resend_after: Duration,
    /// Whether an empty-resend retry is attempted at all (§4.4).
    pub retry_resend_on_empty: bool,
    pub auth: AuthMethod,
}

impl ClientConfig {
    pub fn new(auth: AuthMethod) -> Self {
        Self {
            auto_connect: true,
            auto_disconnect: false,
            verify_signatures: VerifyMode::Auto,
            retry_resend_after: Duration::from_secs(2),
            retry_resend_on_empty: true,
            auth,
        }
    }
}
