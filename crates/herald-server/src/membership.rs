use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::backend::{BackendError, ChatBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    AlreadyJoined,
    Joined,
}

/// Rooms the bot identity is known to be in.
///
/// Each room owns a once-cell: concurrent deliveries to a room nobody has
/// joined yet queue behind a single join call. A failed join removes the
/// room's entry, so the map holds only joined rooms and joins in flight,
/// and the next delivery tries again. Nothing is persisted; after a restart
/// the set is re-seeded from the homeserver.
pub struct RoomMembership {
    backend: Arc<dyn ChatBackend>,
    rooms: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
    join_timeout: Duration,
}

impl RoomMembership {
    pub fn with_joined<I>(backend: Arc<dyn ChatBackend>, joined: I, join_timeout: Duration) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let rooms = joined
            .into_iter()
            .map(|room| (room, Arc::new(OnceCell::new_with(Some(())))))
            .collect();
        Self {
            backend,
            rooms: Mutex::new(rooms),
            join_timeout,
        }
    }

    /// Seeds the set from the rooms the homeserver already reports as joined.
    pub async fn seeded(
        backend: Arc<dyn ChatBackend>,
        join_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let joined = timeout(join_timeout, backend.joined_rooms())
            .await
            .map_err(|_| BackendError::Timeout(join_timeout))??;
        info!(rooms = joined.len(), "joined rooms fetched");
        Ok(Self::with_joined(backend, joined, join_timeout))
    }

    pub async fn is_joined(&self, room: &str) -> bool {
        let rooms = self.rooms.lock().await;
        rooms.get(room).is_some_and(|cell| cell.initialized())
    }

    pub async fn joined_count(&self) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.values().filter(|cell| cell.initialized()).count()
    }

    /// Joins `room` unless it is already recorded. A confirmed join is
    /// never forgotten, even if the caller is cancelled afterwards.
    pub async fn ensure_joined(&self, room: &str) -> Result<JoinOutcome, BackendError> {
        let cell = {
            let mut rooms = self.rooms.lock().await;
            Arc::clone(rooms.entry(room.to_string()).or_default())
        };
        if cell.initialized() {
            return Ok(JoinOutcome::AlreadyJoined);
        }

        let mut joined_here = false;
        let joined_flag = &mut joined_here;
        let joined = cell
            .get_or_try_init(|| async move {
                debug!(room, "joining room");
                timeout(self.join_timeout, self.backend.join_room(room))
                    .await
                    .map_err(|_| BackendError::Timeout(self.join_timeout))??;
                *joined_flag = true;
                Ok::<(), BackendError>(())
            })
            .await;
        if let Err(e) = joined {
            self.forget_failed(room, &cell).await;
            return Err(e);
        }

        Ok(if joined_here {
            JoinOutcome::Joined
        } else {
            JoinOutcome::AlreadyJoined
        })
    }

    /// Drops the entry of a room whose join failed, unless another delivery
    /// still holds the cell.
    async fn forget_failed(&self, room: &str, cell: &Arc<OnceCell<()>>) {
        let mut rooms = self.rooms.lock().await;
        if rooms.get(room).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(current) == 2
        }) {
            rooms.remove(room);
        }
    }

    #[cfg(test)]
    async fn tracked_rooms(&self) -> usize {
        self.rooms.lock().await.len()
    }
}
