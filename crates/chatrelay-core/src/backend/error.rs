//! Backend failure taxonomy.

use thiserror::Error;

/// Human-readable category of a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFailure {
    BadRequest,
    Unauthorized,
    Forbidden,
    Timeout,
    Unprocessable,
    RateLimited,
    Generic,
}

impl BackendFailure {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => BackendFailure::BadRequest,
            401 => BackendFailure::Unauthorized,
            403 => BackendFailure::Forbidden,
            408 => BackendFailure::Timeout,
            422 => BackendFailure::Unprocessable,
            429 => BackendFailure::RateLimited,
            _ => BackendFailure::Generic,
        }
    }

    /// Message shown to the client in the `Error` chunk.
    pub fn message(&self) -> &'static str {
        match self {
            BackendFailure::BadRequest => "Bad request to backend",
            BackendFailure::Unauthorized => "Unauthorized request to backend",
            BackendFailure::Forbidden => "Forbidden request to backend",
            BackendFailure::Timeout => "Request to backend timed out",
            BackendFailure::Unprocessable => "Invalid request format (422 Unprocessable Entity)",
            BackendFailure::RateLimited => "Rate limit exceeded on backend",
            BackendFailure::Generic => "An error occurred with the backend service",
        }
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Request to backend timed out")]
    Timeout,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid backend response: {0}")]
    Decode(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    pub fn failure(&self) -> BackendFailure {
        match self {
            BackendError::Timeout => BackendFailure::Timeout,
            BackendError::Status { status, .. } => BackendFailure::from_status(*status),
            BackendError::Transport(err) if err.is_timeout() => BackendFailure::Timeout,
            BackendError::Cancelled
            | BackendError::Transport(_)
            | BackendError::Decode(_)
            | BackendError::InvalidUrl(_) => BackendFailure::Generic,
        }
    }

    /// Text for the in-band `Error` chunk.
    pub fn client_message(&self) -> &'static str {
        match self {
            BackendError::Cancelled => "Generation cancelled",
            other => other.failure().message(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
