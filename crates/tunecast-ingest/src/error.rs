use std::fmt;

use thiserror::Error;
use tunecast_core::CoreError;

/// A failure worth retrying. Only ever surfaces wrapped in
/// [`IngestError::UpstreamUnavailable`] once attempts run out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientFailure {
    Timeout,
    Status(u16),
    Network(String),
}

impl fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("request timed out"),
            Self::Status(status) => write!(f, "HTTP {status}"),
            Self::Network(msg) => write!(f, "network error: {msg}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream {url} rejected the request with HTTP {status}")]
    UpstreamRejected { url: String, status: u16 },

    #[error("malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("upstream {url} unavailable after {attempts} attempts: {last_error}")]
    UpstreamUnavailable {
        url: String,
        attempts: u32,
        last_error: TransientFailure,
    },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("store error: {0}")]
    Store(CoreError),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl From<CoreError> for IngestError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::NotFound(msg) => Self::NotFound(msg),
            CoreError::Config(msg) => Self::Validation(format!("invalid config: {msg}")),
            CoreError::TomlParse(e) => Self::Validation(format!("invalid config: {e}")),
            other => Self::Store(other),
        }
    }
}

impl IngestError {
    /// Upstream failures that degrade a single item rather than the whole call.
    pub fn is_fatal_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRejected { .. }
                | Self::MalformedResponse { .. }
                | Self::UpstreamUnavailable { .. }
        )
    }

    /// HTTP-style status for callers that report errors that way.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::UpstreamRejected { .. }
            | Self::MalformedResponse { .. }
            | Self::UpstreamUnavailable { .. } => 502,
            Self::DeadlineExceeded => 504,
            Self::Store(_) | Self::InvalidUrl(_) | Self::Client(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
