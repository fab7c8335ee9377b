use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error};

use mirsal_types::backend::{Backend, BackendResult};
use mirsal_types::models::RoomWithMemberCount;

/// In-memory list of every room with its member count, newest first.
/// Cloning shares the same list.
pub struct RoomDirectory<B> {
    backend: Arc<B>,
    rooms: Arc<RwLock<Vec<RoomWithMemberCount>>>,
}

impl<B> Clone for RoomDirectory<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            rooms: self.rooms.clone(),
        }
    }
}

impl<B: Backend> RoomDirectory<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            rooms: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Re-fetch every room and replace the list. On failure the previous
    /// list is kept.
    pub async fn refresh(&self) -> BackendResult<usize> {
        let rooms = self.backend.rooms_with_member_count().await.map_err(|e| {
            error!("Failed to load rooms: {}", e);
            e
        })?;

        let count = rooms.len();
        *self.rooms.write().await = rooms;
        debug!("Room directory refreshed with {} room(s)", count);
        Ok(count)
    }

    pub async fn rooms(&self) -> Vec<RoomWithMemberCount> {
        self.rooms.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.rooms.write().await.clear();
    }
}
