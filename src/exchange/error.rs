//! Typed adapter failures.

use thiserror::Error;

/// Failure surfaced by a venue adapter after its own retries are exhausted.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Authentication or session setup failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Timeouts, 5xx responses, dropped sockets.
    #[error("network error: {0}")]
    Network(String),

    /// 429 or anti-bot block.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Venue refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl VenueError {
    /// Whether a retry at the adapter boundary may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::Network(_) | VenueError::RateLimited(_))
    }
}

pub type VenueResult<T> = Result<T, VenueError>;
