use hyper::StatusCode;
use std::io;
use thiserror::Error;

/// Failure talking to one of the upstream providers.
///
/// These never leave the resolver: every one of them means "try the next
/// strategy".
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,

    #[error("provider answered HTTP {status}")]
    Http { status: StatusCode },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider reported an error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Every resolution strategy failed or was inapplicable.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no audio available: {reason}")]
    Exhausted { reason: String },
}

/// Failure materialising a track on local storage.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download failed: {0}")]
    Network(String),

    #[error("download answered HTTP {0}")]
    Status(StatusCode),

    #[error("download produced no bytes")]
    EmptyBody,

    #[error("cannot derive a file name from {0:?}")]
    InvalidName(String),

    #[error("storage write failed: {0}")]
    Storage(#[from] io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Shared proxy store trouble. Always absorbed by the process-local fallback.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store entry codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Outcome of a relay request that did not produce a stream.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("stream not found or expired")]
    NotFound,

    #[error("origin fetch failed: {0}")]
    Origin(String),

    #[error("failed to build relay response: {0}")]
    Response(#[from] http::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Origin(_) | Self::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short human readable body sent to the client.
    pub fn body(&self) -> &'static str {
        match self {
            Self::NotFound => "Stream not found or expired",
            Self::Origin(_) => "Failed to fetch audio",
            Self::Response(_) => "Error streaming audio",
        }
    }
}
