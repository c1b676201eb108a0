// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error kinds surfaced by the client core (§7).
#[derive(Debug, Clone)]
pub enum ClientError {
    /// A well-formed frame with unexpected content (e.g. an unmatched unicast).
    Protocol { message: String },
    /// A matching `ErrorResponse` was received for a pending request.
    RequestFailed { code: String, message: String },
    /// A frame could not be parsed.
    Decode { message: String },
    /// The connection dropped while an operation was outstanding.
    Transport { message: String },
    /// Invalid options at construction or at `subscribe()`.
    Configuration { message: String },
    /// The operation was cancelled by the caller.
    Aborted,
}

impl ClientError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Short machine-readable code, grounded on `MuxError::as_str`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol { .. } => "PROTOCOL",
            Self::RequestFailed { .. } => "REQUEST_FAILED",
            Self::Decode { .. } => "DECODE",
            Self::Transport { .. } => "TRANSPORT",
            Self::Configuration { .. } => "CONFIGURATION",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol { message } => write!(f, "protocol error: {message}"),
            Self::RequestFailed { code, message } => {
                write!(f, "request failed ({code}): {message}")
            }
            Self::Decode { message } => write!(f, "decode error: {message}"),
            Self::Transport { message } => write!(f, "transport error: {message}"),
            Self::Configuration { message } => write!(f, "configuration error: {message}"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ClientError> for ProtocolError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::RequestFailed { code, message } => ProtocolError { code, message },
            other => ProtocolError { code: other.code().to_owned(), message: other.to_string() },
        }
    }
}

/// The `{code, message}` pair carried by a broker `ErrorResponse` (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}
