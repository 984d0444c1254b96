use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use herald_contracts::HtmlMessage;

use crate::backend::{BackendError, ChatBackend};

/// In-memory homeserver that records every call.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub joined: Vec<String>,
    pub join_delay: Duration,
    pub send_delay: Duration,
    pub failing_joins: Mutex<HashSet<String>>,
    pub fail_sends: bool,
    pub join_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub sent: Mutex<Vec<(String, HtmlMessage)>>,
}

impl FakeBackend {
    pub fn fail_joins_for(&self, room: &str) {
        self.failing_joins
            .lock()
            .unwrap()
            .insert(room.to_string());
    }

    pub fn heal_joins_for(&self, room: &str) {
        self.failing_joins.lock().unwrap().remove(room);
    }

    pub fn joins(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn joined_rooms(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.joined.clone())
    }

    async fn join_room(&self, room: &str) -> Result<(), BackendError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        if !self.join_delay.is_zero() {
            tokio::time::sleep(self.join_delay).await;
        }
        if self.failing_joins.lock().unwrap().contains(room) {
            return Err(BackendError::Status {
                status: 403,
                body: "forbidden".to_string(),
            });
        }
        Ok(())
    }

    async fn send_message(&self, room: &str, message: &HtmlMessage) -> Result<(), BackendError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        if self.fail_sends {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((room.to_string(), message.clone()));
        Ok(())
    }
}
