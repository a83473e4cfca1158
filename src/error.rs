//! Dispatcher Error Types
//!
//! Terminal outcomes surfaced to callers. Retries never reach this type;
//! a dispatched request resolves or rejects exactly once.

use thiserror::Error;

use crate::route::Verb;
use crate::transport::ResponseBody;

/// Network-level failure cause.
///
/// An owned wrapper rather than `reqwest::Error` directly, since transport
/// doubles cannot construct reqwest's error type.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError(format!("request timed out: {}", err))
        } else if err.is_connect() {
            TransportError(format!("connection failed: {}", err))
        } else {
            TransportError(err.to_string())
        }
    }
}

/// Main error type for dispatch operations.
///
/// Every request-scoped variant carries the verb and route it failed on,
/// plus the status and body where one exists, so callers can act without
/// reaching into dispatcher internals.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Retry cap exceeded while the request kept getting rate limited.
    #[error("{verb} {route} still rate limited after {attempts} attempts")]
    RateLimitExhausted {
        verb: Verb,
        route: String,
        attempts: u32,
    },

    /// 4xx other than 429. Repeating the request cannot succeed, so it is
    /// never retried.
    #[error("{verb} {route} rejected with status {status}")]
    ClientRejected {
        verb: Verb,
        route: String,
        status: u16,
        body: ResponseBody,
    },

    /// 5xx after exhausting retries.
    #[error("{verb} {route} failed with status {status} after {attempts} attempts")]
    ServerUnavailable {
        verb: Verb,
        route: String,
        status: u16,
        attempts: u32,
    },

    /// Network-level failure after exhausting retries.
    #[error("{verb} {route} failed after {attempts} attempts: {source}")]
    TransportFailure {
        verb: Verb,
        route: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Invalid dispatcher configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A bucket worker dropped a request without resolving it.
    #[error("internal dispatcher error: {0}")]
    Internal(String),
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
