//! Error taxonomy shared by every lockbridge crate.
//!
//! The variants follow how a failure is expected to be handled:
//!
//! - [`Error::Authentication`] is terminal. No usable session exists and the
//!   bridge has to authenticate again (startup fails if this happens there).
//! - [`Error::TokenExpired`] is normally recovered inside the request queue by
//!   refreshing the session and replaying the call.
//! - [`Error::TransientService`] is produced after the retry budget for the
//!   cloud's "busy, try again" signal has been used up.
//! - [`Error::RequestFailed`] and [`Error::InvalidResponse`] end the call; a
//!   device coordinator that sees one marks its lock offline.
//! - [`Error::ProtocolDecode`] never leaves the access-code control point,
//!   which answers with an empty response instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Session errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access token expired")]
    TokenExpired,

    // Cloud service errors
    #[error("Cloud service busy on {endpoint} after {attempts} attempts")]
    TransientService { endpoint: String, attempts: u32 },

    #[error("Request to {endpoint} failed (status {status}, errcode {errcode:?}): {body}")]
    RequestFailed {
        endpoint: String,
        status: u16,
        errcode: Option<i64>,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request queue closed")]
    QueueClosed,

    // Protocol errors
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    // Device errors
    #[error("Lock not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Create a new invalid response error.
    pub fn invalid_response(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a new protocol decode error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolDecode(message.into())
    }

    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::TransientService { .. } | Self::Transport(_)
        )
    }

    /// Whether the session is unusable until the bridge authenticates again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
