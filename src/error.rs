//! Relay Errors
//!
//! Failures that can end a streaming session before the backend finishes.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The backend could not be reached or the connection broke before headers.
    #[error("backend unreachable: {0}")]
    UpstreamUnavailable(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend error: {0}")]
    UpstreamStatus(StatusCode),

    /// The backend reported an error or the body stream broke mid-flight.
    #[error("backend stream failed: {0}")]
    Upstream(String),

    #[error("invalid backend url '{0}'")]
    InvalidBaseUrl(String),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
