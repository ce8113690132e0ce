//! Tracker error taxonomy
//!
//! Every failure the reconciliation path can hit is classified here as either
//! retryable (rate limits, transient transport trouble) or permanent. The retry
//! loop only ever looks at `is_retryable()` and `retry_after()`.

use std::time::Duration;

#[derive(Debug)]
pub enum TrackerError {
    /// Upstream answered 429. Carries the `Retry-After` hint when one was sent.
    RateLimited { retry_after: Option<Duration> },
    /// Timeout, connection reset, 5xx.
    Transient(String),
    /// Player, match or entry does not exist upstream.
    NotFound(String),
    /// Payload could not be decoded or is missing required data.
    Malformed(String),
    /// Upstream refused the request (bad key, forbidden, bad request).
    Rejected { status: u16, message: String },
    /// Store read or write failed. Never retried mid-cycle.
    Persistence(String),
    /// Notification could not be handed to one consuming context.
    Delivery(String),
    /// Retryable failures kept coming until the attempt or time budget ran out.
    Exhausted {
        attempts: u32,
        last: Box<TrackerError>,
    },
    /// Shutdown was signalled while waiting to retry.
    Cancelled,
}

impl TrackerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Explicit delay requested by the upstream, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::NotFound(_) => "not_found",
            Self::Malformed(_) => "malformed",
            Self::Rejected { .. } => "rejected",
            Self::Persistence(_) => "persistence",
            Self::Delivery(_) => "delivery",
            Self::Exhausted { .. } => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited (retry after {}s)", d.as_secs()),
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Transient(msg) => write!(f, "transient upstream failure: {}", msg),
            Self::NotFound(what) => write!(f, "not found: {}", what),
            Self::Malformed(msg) => write!(f, "malformed upstream payload: {}", msg),
            Self::Rejected { status, message } => {
                write!(f, "upstream rejected request ({}): {}", status, message)
            }
            Self::Persistence(msg) => write!(f, "persistence failure: {}", msg),
            Self::Delivery(msg) => write!(f, "delivery failure: {}", msg),
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            Self::Cancelled => write!(f, "cancelled by shutdown"),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            // timeouts, connect failures, dropped bodies
            Self::Transient(e.to_string())
        }
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
