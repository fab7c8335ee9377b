//! Contracts for the managed backend the client talks to.
//!
//! The backend owns accounts, the relational store (profiles, rooms,
//! memberships, messages), row-level access policies and the change feed.
//! Clients only ever see it through these two traits.

use std::future::Future;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{NewMessage, NewRoom, ProfileUpdate, SignUpMetadata};
use crate::events::{AuthUser, MessageInserted, SessionEvent};
use crate::models::{Message, MessageWithSender, Profile, Room, RoomMember, RoomWithMemberCount};

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("row not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden by policy: {0}")]
    Forbidden(String),
    #[error("backend request failed: {0}")]
    Request(String),
}

impl BackendError {
    /// Message suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Conflict(msg) | Self::Unauthorized(msg) | Self::Forbidden(msg) => Some(msg),
            Self::NotFound | Self::Request(_) => None,
        }
    }
}

/// Handle for a live change-feed subscription. Cloning shares the same
/// underlying subscription; `unsubscribe` may be called any number of times.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    room_id: Uuid,
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn new(room_id: Uuid, token: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            token,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn unsubscribe(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Unsubscribing {} from room {}", self.id, self.room_id);
            self.token.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// An acknowledged subscription: the handle plus the stream of insert
/// notifications matching its filter. The stream ends after `unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub inserts: mpsc::UnboundedReceiver<MessageInserted>,
}

/// Relational store + change feed. Each method is one query shape over the
/// `profiles`, `rooms`, `room_members` and `messages` tables.
pub trait Backend: Send + Sync + 'static {
    /// `select * from profiles where id = $1`
    fn profile(&self, user_id: Uuid) -> impl Future<Output = BackendResult<Option<Profile>>> + Send;

    /// `update profiles set .. where id = $1`; owner only.
    fn update_profile(
        &self,
        user_id: Uuid,
        patch: ProfileUpdate,
    ) -> impl Future<Output = BackendResult<Profile>> + Send;

    /// `select * from rooms where id = $1`
    fn room(&self, room_id: Uuid) -> impl Future<Output = BackendResult<Option<Room>>> + Send;

    /// Every room with its membership count, newest first.
    fn rooms_with_member_count(
        &self,
    ) -> impl Future<Output = BackendResult<Vec<RoomWithMemberCount>>> + Send;

    fn insert_room(&self, room: NewRoom) -> impl Future<Output = BackendResult<Room>> + Send;

    /// Insert-or-replace by id. Used for well-known seed rooms.
    fn upsert_room(&self, room: Room) -> impl Future<Output = BackendResult<Room>> + Send;

    /// Idempotent membership write.
    fn upsert_membership(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = BackendResult<RoomMember>> + Send;

    /// Plain insert; fails with `Conflict` when the membership exists.
    fn insert_membership(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = BackendResult<RoomMember>> + Send;

    fn delete_membership(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = BackendResult<()>> + Send;

    /// The `limit` most recent messages of a room, returned oldest first.
    fn recent_messages(
        &self,
        room_id: Uuid,
        limit: u32,
    ) -> impl Future<Output = BackendResult<Vec<MessageWithSender>>> + Send;

    /// A single message joined with its author, `None` if it no longer exists.
    fn message_with_sender(
        &self,
        message_id: Uuid,
    ) -> impl Future<Output = BackendResult<Option<MessageWithSender>>> + Send;

    fn insert_message(&self, message: NewMessage) -> impl Future<Output = BackendResult<Message>> + Send;

    /// Subscribe to inserts on `messages` filtered by `room_id = $1`.
    /// Resolves once the backend has acknowledged the subscription.
    fn subscribe_message_inserts(
        &self,
        room_id: Uuid,
    ) -> impl Future<Output = BackendResult<Subscription>> + Send;
}

/// Credential store and session management.
pub trait AuthBackend: Send + Sync + 'static {
    fn sign_up(
        &self,
        identity_key: &str,
        secret: &str,
        metadata: SignUpMetadata,
    ) -> impl Future<Output = BackendResult<AuthUser>> + Send;

    fn sign_in_with_secret(
        &self,
        identity_key: &str,
        secret: &str,
    ) -> impl Future<Output = BackendResult<AuthUser>> + Send;

    fn sign_out(&self) -> impl Future<Output = BackendResult<()>> + Send;

    /// The account of the active session, if any.
    fn current_user(&self) -> Option<AuthUser>;

    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;
}
