use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("unsupported by provider: {0}")]
    Unsupported(String),
}

impl LlmError {
    /// Classify a non-success HTTP status with its body for diagnostics.
    pub(crate) fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth(format!("{provider} status={status} body={body}")),
            429 => Self::RateLimited(format!("{provider} status={status} body={body}")),
            _ => Self::Http(format!("{provider} status={status} body={body}")),
        }
    }

    /// Transient failures are expected to succeed on a later attempt and are
    /// safe to paper over with a deterministic fallback.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::Http(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
