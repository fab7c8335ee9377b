use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageWithSender, Room};

/// Change-feed notification for a new row in `messages`.
/// Carries ids only; subscribers re-fetch the row to render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInserted {
    pub id: Uuid,
    pub room_id: Uuid,
}

/// Authenticated account as seen by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub identity_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    SignedIn(AuthUser),
    SignedOut,
}

/// Events emitted by the chat coordinator for the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// The current room changed (`None` after leaving or sign-out).
    RoomChanged(Option<Room>),
    /// A pushed message was hydrated and appended to the current room.
    MessageAppended(MessageWithSender),
    /// The room directory was replaced.
    RoomsRefreshed { count: usize },
    Loading(bool),
}
