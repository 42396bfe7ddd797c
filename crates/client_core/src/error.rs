use shared::error::{ErrorCode, RealtimeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url '{0}'")]
    InvalidUrl(String),
    #[error("failed to connect list socket: {0}")]
    Connect(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Api { code, .. } => *code,
            ClientError::Realtime(err) => Some(err.code()),
            _ => None,
        }
    }
}
