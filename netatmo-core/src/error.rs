//! Error types for the Netatmo client.

use std::fmt;

use thiserror::Error;

/// Maximum number of body characters kept in error messages.
const MAX_BODY_CHARS: usize = 200;

/// Failure reported by a [`Transport`](crate::transport::Transport).
///
/// Carries the HTTP status and the raw body, when the server got far enough
/// to produce them, so callers can log what actually came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
    pub body: Option<String>,
}

impl TransportError {
    /// Network-level failure: no status, no body.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            body: None,
        }
    }

    /// The server answered with a non-success status.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: format!("request failed with status {status}"),
            body: Some(body.into()),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(body) = &self.body {
            write!(f, ": {}", truncate_body(body))?;
        }
        Ok(())
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            body: None,
        }
    }
}

/// Every failure the core can surface.
///
/// The type is `Clone` because a failed token refresh is handed, unchanged,
/// to every caller that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("not authenticated: seed tokens or exchange an authorization code first")]
    NotAuthenticated,

    #[error("token exchange failed")]
    AuthExchange(#[source] TransportError),

    #[error("token refresh failed")]
    TokenRefresh(#[source] TransportError),

    #[error("row at {timestamp} has {actual} values, expected {expected}")]
    ShapeMismatch {
        timestamp: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String, payload: String },

    #[error("unsupported capability '{0}'")]
    UnsupportedCapability(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>, payload: &serde_json::Value) -> Self {
        Error::MalformedResponse {
            message: message.into(),
            payload: payload.to_string(),
        }
    }

    /// The underlying HTTP failure, if there is one.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Error::AuthExchange(e) | Error::TokenRefresh(e) | Error::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// The raw payload associated with the failure, if there is one.
    pub fn payload(&self) -> Option<&str> {
        match self {
            Error::MalformedResponse { payload, .. } => Some(payload),
            _ => self.transport().and_then(|e| e.body.as_deref()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_BODY_CHARS {
        let head: String = body.chars().take(MAX_BODY_CHARS).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}
