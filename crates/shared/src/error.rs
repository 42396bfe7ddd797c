use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failure taxonomy of the real-time path.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("list access denied: {0}")]
    Authorization(String),
    #[error("list coordinator unreachable: {0}")]
    PartitionLookup(String),
    #[error("broadcast delivery failed: {0}")]
    BroadcastDelivery(String),
    #[error("malformed list event: {0}")]
    MalformedEvent(String),
}

impl RealtimeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RealtimeError::Authentication(_) => ErrorCode::Unauthorized,
            RealtimeError::Authorization(_) => ErrorCode::Forbidden,
            RealtimeError::PartitionLookup(_) => ErrorCode::Unavailable,
            RealtimeError::BroadcastDelivery(_) => ErrorCode::Unavailable,
            RealtimeError::MalformedEvent(_) => ErrorCode::Validation,
        }
    }
}

impl From<RealtimeError> for ApiError {
    fn from(value: RealtimeError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}
