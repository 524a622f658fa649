//! Gateway error taxonomy.

use chatrelay_traits::TraitError;
use thiserror::Error;

use crate::backend::BackendError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Backend(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GatewayError::BadRequest(message.into())
    }

    pub fn unauthorized() -> Self {
        GatewayError::Unauthorized("Unauthorized".to_string())
    }

    pub fn forbidden() -> Self {
        GatewayError::Forbidden("Forbidden".to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        GatewayError::NotFound(message.into())
    }

    /// HTTP status this error is reported with before any bytes are sent.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::BadRequest(_) => 400,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::QuotaExceeded(_) => 429,
            GatewayError::Timeout(_) => 504,
            GatewayError::Backend(_) => 502,
            GatewayError::Persistence(_) | GatewayError::Internal(_) => 500,
        }
    }
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout => GatewayError::Timeout(err.client_message().to_string()),
            other => GatewayError::Backend(other.client_message().to_string()),
        }
    }
}

impl From<TraitError> for GatewayError {
    fn from(err: TraitError) -> Self {
        GatewayError::Persistence(err.to_string())
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
