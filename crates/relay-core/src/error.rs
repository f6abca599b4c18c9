use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Stream completed without any answer content")]
    EmptyResponse,

    #[error("Message sink error: {0}")]
    Sink(#[from] SinkError),
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::RateLimit(_) | Error::Timeout(_) | Error::Stream(_) => true,
            Error::Sink(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// True for failures of the upstream chat API, as opposed to the display side.
    pub fn is_upstream(&self) -> bool {
        !matches!(
            self,
            Error::Sink(_) | Error::Cancelled | Error::EmptyResponse | Error::Timeout(_)
        )
    }
}

/// Failure of a single send/edit/delete on the messaging platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("message not found")]
    NotFound,

    #[error("message is not modified")]
    NotModified,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by platform: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::RateLimited { .. } | SinkError::Transport(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SinkError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
