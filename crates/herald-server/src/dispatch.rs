use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_contracts::{HtmlMessage, KeyValue};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::backend::{BackendError, ChatBackend};
use crate::membership::{JoinOutcome, RoomMembership};
use crate::metrics::Metrics;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not join room {room}: {source}")]
    Join {
        room: String,
        #[source]
        source: BackendError,
    },
    #[error("could not send message to room {room}: {source}")]
    Send {
        room: String,
        #[source]
        source: BackendError,
    },
}

/// Delivers one rendered message to one room. Exactly one attempt is made.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn deliver(&self, message: &str, room: &str) -> Result<(), DeliveryError>;
}

pub struct ChatDispatcher {
    backend: Arc<dyn ChatBackend>,
    membership: Arc<RoomMembership>,
    room_mapping: KeyValue,
    metrics: Arc<dyn Metrics>,
    send_timeout: Duration,
}

impl ChatDispatcher {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        membership: Arc<RoomMembership>,
        room_mapping: KeyValue,
        metrics: Arc<dyn Metrics>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            membership,
            room_mapping,
            metrics,
            send_timeout,
        }
    }

    fn target_room<'a>(&'a self, room: &'a str) -> &'a str {
        self.room_mapping
            .get(room)
            .map(String::as_str)
            .unwrap_or(room)
    }
}

#[async_trait]
impl Dispatcher for ChatDispatcher {
    async fn deliver(&self, message: &str, room: &str) -> Result<(), DeliveryError> {
        let target = self.target_room(room);

        match self.membership.ensure_joined(target).await {
            Ok(JoinOutcome::Joined) => self.metrics.join_succeeded(target),
            Ok(JoinOutcome::AlreadyJoined) => {}
            Err(source) => {
                self.metrics.join_failed(target);
                error!(room = target, error = %source, "failed to join room");
                return Err(DeliveryError::Join {
                    room: target.to_string(),
                    source,
                });
            }
        }

        let content = HtmlMessage::text(message);
        let sent = timeout(self.send_timeout, self.backend.send_message(target, &content))
            .await
            .map_err(|_| BackendError::Timeout(self.send_timeout))
            .and_then(|result| result);
        match sent {
            Ok(()) => {
                self.metrics.send_succeeded();
                debug!(room = target, "message sent to homeserver");
                Ok(())
            }
            Err(source) => {
                self.metrics.send_failed();
                error!(room = target, error = %source, "could not send message to homeserver");
                Err(DeliveryError::Send {
                    room: target.to_string(),
                    source,
                })
            }
        }
    }
}
