//! Error type shared by collaborator implementations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraitError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend returned status {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid data: {0}")]
    Invalid(String),

    #[error("{0}")]
    Other(String),
}

impl TraitError {
    /// HTTP status carried by the failure, if it came from the backend.
    pub fn status(&self) -> Option<u16> {
        match self {
            TraitError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TraitError {
    fn from(err: serde_json::Error) -> Self {
        TraitError::Invalid(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TraitError>;
