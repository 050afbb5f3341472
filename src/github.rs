//! GitHub data-acquisition engine.
//!
//! Everything that talks to GitHub goes through [`GithubClient`], which is
//! built per request on top of the process-wide [`Transport`] (connection
//! pool, dispatch semaphore, rate-limit state and circuit breaker).

use std::fmt;

pub mod breaker;
pub mod client;
pub mod queries;
pub mod rate_limit;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{GithubClient, Transport, default_token_from_env};
pub use rate_limit::{LimitTier, RateLimitSnapshot, RateLimitState};

/// Observer interface for transport events.
///
/// The engine never depends on a concrete metrics sink; a deployment
/// plugs one in through [`Transport::with_observer`]. Every hook has a
/// no-op default so observers implement only what they count.
pub trait TransportObserver: Send + Sync {
    fn on_response(&self, status: u16) {
        let _ = status;
    }
    fn on_retry(&self) {}
    /// A call was rejected without dispatch because the breaker is open.
    fn on_breaker_rejection(&self) {}
    fn on_throttle(&self, wait: std::time::Duration) {
        let _ = wait;
    }
}

/// The default observer: events surface through tracing only.
pub struct LogObserver;

impl TransportObserver for LogObserver {}

/// Transport-level failures from the GitHub client.
#[derive(Debug)]
pub enum ClientError {
    /// The circuit breaker is open; the call was never dispatched.
    BreakerOpen,
    /// GitHub's secondary rate limit, still failing after retries.
    RateLimited { retry_after: Option<u64> },
    /// A non-retryable HTTP status (4xx other than secondary rate limits).
    Status { status: u16, body: String },
    /// Network-level failure (connect, timeout, TLS) after retries.
    Network(reqwest::Error),
    /// A 2xx response whose body did not decode as the expected JSON.
    Decode(String),
    /// GitHub kept answering 202 (statistics still computing) until the
    /// polling budget ran out.
    Incomplete,
    /// A well-formed GraphQL response carrying an `errors` array.
    Graphql(String),
}

impl ClientError {
    /// Whether the retry loop should take another attempt at this failure.
    ///
    /// Decode failures on successful responses are classified with the
    /// 5xx family: the payload may simply not be materialised yet.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Decode(_) => true,
            ClientError::RateLimited { .. } => true,
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::BreakerOpen | ClientError::Incomplete | ClientError::Graphql(_) => false,
        }
    }

    /// Whether this failure counts against the circuit breaker.
    ///
    /// 4xx responses prove GitHub is reachable and answering; only
    /// network errors and 5xx-class failures accumulate.
    pub(crate) fn trips_breaker(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Decode(_) => true,
            ClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::BreakerOpen => write!(f, "circuit breaker open"),
            ClientError::RateLimited { retry_after } => match retry_after {
                Some(secs) => write!(f, "secondary rate limit (retry after {secs}s)"),
                None => write!(f, "secondary rate limit"),
            },
            ClientError::Status { status, body } => {
                write!(f, "GitHub returned {status}: {body}")
            }
            ClientError::Network(e) => write!(f, "network error: {e}"),
            ClientError::Decode(msg) => write!(f, "failed to decode response: {msg}"),
            ClientError::Incomplete => write!(f, "statistics still computing (202)"),
            ClientError::Graphql(msg) => write!(f, "GraphQL error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Network(e) => Some(e),
            _ => None,
        }
    }
}
