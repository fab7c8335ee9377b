use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use mirsal_types::backend::Backend;
use mirsal_types::models::Room;

pub struct DefaultRoom {
    pub id: Uuid,
    pub name: &'static str,
    pub description: &'static str,
}

pub const DEFAULT_ROOMS: [DefaultRoom; 3] = [
    DefaultRoom {
        id: Uuid::from_u128(1),
        name: "General",
        description: "General discussion about desert life and culture",
    },
    DefaultRoom {
        id: Uuid::from_u128(2),
        name: "Desert Travelers",
        description: "Share your journey across the sands",
    },
    DefaultRoom {
        id: Uuid::from_u128(3),
        name: "Dune Photography",
        description: "Share your best desert landscape photos",
    },
];

/// Upsert the well-known public rooms, created by `created_by`. A failed
/// room is logged and skipped. Returns how many were written.
pub async fn seed_default_rooms<B: Backend>(backend: &B, created_by: Uuid) -> usize {
    let now = Utc::now();
    let mut seeded = 0;

    for default in &DEFAULT_ROOMS {
        let room = Room {
            id: default.id,
            name: default.name.to_string(),
            description: Some(default.description.to_string()),
            is_private: false,
            created_by: Some(created_by),
            created_at: now,
            updated_at: now,
        };
        match backend.upsert_room(room).await {
            Ok(_) => seeded += 1,
            Err(e) => error!("Error creating default room '{}': {}", default.name, e),
        }
    }

    info!("Seeded {} default room(s)", seeded);
    seeded
}
