//! Error taxonomy surfaced by the fetch layer.
//!
//! Transient failures (dial, handshake, per-attempt timeout, 5xx, 429) are
//! retried internally and only surface once retries are exhausted, wrapped
//! in [`FetchError::Exhausted`] with the last cause preserved as `source()`.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::config::ConfigError;
use crate::fingerprint::CatalogError;
use crate::modules::rate_limit::LimiterError;
use crate::transport::TransportError;

/// Result alias used across the fetch layer.
pub type FetchResult<T> = Result<T, FetchError>;

/// Coarse classification of a [`FetchError`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Dial,
    Handshake,
    Network,
    Timeout,
    Cancelled,
    RateLimited,
    FatalClient,
    Server,
    Decode,
    Closed,
    InvalidRequest,
    Config,
}

/// A single failed physical attempt.
#[derive(Debug, Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("rate limited by upstream (HTTP 429, retry-after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("upstream server error: HTTP {status}")]
    Server { status: u16 },
}

impl AttemptFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AttemptFailure::Transport(err) => err.kind(),
            AttemptFailure::RateLimited { .. } => ErrorKind::RateLimited,
            AttemptFailure::Server { .. } => ErrorKind::Server,
        }
    }
}

/// Terminal error returned to upstream clients.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("deadline exceeded after {attempts} attempt(s)")]
    Timeout {
        attempts: u32,
        #[source]
        last: Option<Box<AttemptFailure>>,
    },
    #[error("upstream rejected request to {url}: HTTP {status}")]
    FatalClient { status: u16, url: Url, body: Bytes },
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<AttemptFailure>,
    },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("rate limiter closed")]
    LimiterClosed,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("browser catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Cancelled => ErrorKind::Cancelled,
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::FatalClient { .. } => ErrorKind::FatalClient,
            FetchError::Exhausted { last, .. } => last.kind(),
            FetchError::Decode(_) => ErrorKind::Decode,
            FetchError::LimiterClosed => ErrorKind::Closed,
            FetchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            FetchError::Config(_) | FetchError::Catalog(_) => ErrorKind::Config,
        }
    }

    /// The last per-attempt failure, when the error wraps one.
    pub fn last_attempt(&self) -> Option<&AttemptFailure> {
        match self {
            FetchError::Exhausted { last, .. } => Some(last),
            FetchError::Timeout { last, .. } => last.as_deref(),
            _ => None,
        }
    }

    /// Number of physical attempts made before giving up, where known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            FetchError::Exhausted { attempts, .. } | FetchError::Timeout { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

impl From<LimiterError> for FetchError {
    fn from(err: LimiterError) -> Self {
        match err {
            LimiterError::Cancelled => FetchError::Cancelled,
            LimiterError::DeadlineExceeded => FetchError::Timeout {
                attempts: 0,
                last: None,
            },
            LimiterError::Closed => FetchError::LimiterClosed,
            other @ (LimiterError::InvalidQuota { .. } | LimiterError::NoRuntime) => {
                FetchError::Config(ConfigError::Invalid(other.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn exhausted_error_reports_kind_of_last_cause() {
        let err = FetchError::Exhausted {
            attempts: 3,
            last: Box::new(AttemptFailure::Server { status: 503 }),
        };
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.attempts(), Some(3));
        let source = err.source().expect("last cause is kept");
        assert_eq!(source.to_string(), "upstream server error: HTTP 503");
    }

    #[test]
    fn limiter_errors_map_onto_taxonomy() {
        assert_eq!(FetchError::from(LimiterError::Cancelled).kind(), ErrorKind::Cancelled);
        assert_eq!(FetchError::from(LimiterError::DeadlineExceeded).kind(), ErrorKind::Timeout);
        assert_eq!(FetchError::from(LimiterError::Closed).kind(), ErrorKind::Closed);
    }
}
