use std::time::Duration;

use async_trait::async_trait;
use herald_contracts::HtmlMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("homeserver answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// The chat operations delivery depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn joined_rooms(&self) -> Result<Vec<String>, BackendError>;
    async fn join_room(&self, room: &str) -> Result<(), BackendError>;
    async fn send_message(&self, room: &str, message: &HtmlMessage) -> Result<(), BackendError>;
}
