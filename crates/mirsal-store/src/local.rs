//! Embedded backend: SQLite storage, Argon2 credentials, row-level policy
//! checks and an in-process change feed, behind the client-facing traits.

use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mirsal_types::api::{NewMessage, NewRoom, ProfileUpdate, SignUpMetadata};
use mirsal_types::backend::{AuthBackend, Backend, BackendError, BackendResult, Subscription};
use mirsal_types::events::{AuthUser, MessageInserted, SessionEvent};
use mirsal_types::models::{
    Message, MessageWithSender, Profile, Room, RoomMember, RoomWithMemberCount,
};

use crate::Database;
use crate::feed::ChangeFeed;
use crate::models::{MessageRow, RoomRow, format_ts};
use crate::secrets;

const INVALID_CREDENTIALS: &str = "Invalid login credentials";

/// One client connection to the embedded store. Each instance carries its
/// own session; instances created with [`LocalBackend::sibling`] share the
/// database and change feed, like two browsers on the same service.
pub struct LocalBackend {
    db: Arc<Database>,
    feed: ChangeFeed,
    session: RwLock<Option<AuthUser>>,
    session_tx: broadcast::Sender<SessionEvent>,
}

impl LocalBackend {
    pub fn new(db: Arc<Database>, feed: ChangeFeed) -> Self {
        let (session_tx, _) = broadcast::channel(16);
        Self {
            db,
            feed,
            session: RwLock::new(None),
            session_tx,
        }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(Database::open(path)?), ChangeFeed::new()))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(Database::open_in_memory()?), ChangeFeed::new()))
    }

    /// A second, signed-out connection to the same store.
    pub fn sibling(&self) -> Self {
        Self::new(self.db.clone(), self.feed.clone())
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn session_user(&self) -> Option<AuthUser> {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_session(&self, user: Option<AuthUser>) {
        match self.session.write() {
            Ok(mut guard) => *guard = user,
            Err(poisoned) => *poisoned.into_inner() = user,
        }
    }

    fn require_session(&self) -> BackendResult<AuthUser> {
        self.session_user()
            .ok_or_else(|| BackendError::Unauthorized("Not authenticated".into()))
    }

    /// Row-level policy: the row must belong to the signed-in account.
    fn require_owner(&self, user_id: Uuid, table: &str) -> BackendResult<AuthUser> {
        let user = self.require_session()?;
        if user.id != user_id {
            warn!("Policy violation on {}: {} acting as {}", table, user.id, user_id);
            return Err(BackendError::Forbidden(format!(
                "new row violates row-level security policy for table \"{}\"",
                table
            )));
        }
        Ok(user)
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                BackendError::Request(e.to_string())
            })?
            .map_err(|e| {
                error!("Database error: {:#}", e);
                BackendError::Request(format!("{:#}", e))
            })
    }
}

impl Backend for LocalBackend {
    async fn profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>> {
        self.blocking(move |db| {
            db.get_profile(&user_id.to_string())?
                .map(|row| row.into_model())
                .transpose()
        })
        .await
    }

    async fn update_profile(&self, user_id: Uuid, patch: ProfileUpdate) -> BackendResult<Profile> {
        self.require_owner(user_id, "profiles")?;
        let now = format_ts(Utc::now());

        self.blocking(move |db| {
            db.update_profile(&user_id.to_string(), &patch, &now)?
                .map(|row| row.into_model())
                .transpose()
        })
        .await?
        .ok_or(BackendError::NotFound)
    }

    async fn room(&self, room_id: Uuid) -> BackendResult<Option<Room>> {
        self.blocking(move |db| {
            db.get_room(&room_id.to_string())?
                .map(|row| row.into_model())
                .transpose()
        })
        .await
    }

    async fn rooms_with_member_count(&self) -> BackendResult<Vec<RoomWithMemberCount>> {
        self.blocking(|db| {
            db.list_rooms_with_member_count()?
                .into_iter()
                .map(|(row, member_count)| {
                    Ok(RoomWithMemberCount {
                        room: row.into_model()?,
                        member_count,
                    })
                })
                .collect()
        })
        .await
    }

    async fn insert_room(&self, room: NewRoom) -> BackendResult<Room> {
        self.require_owner(room.created_by, "rooms")?;

        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            name: room.name,
            description: room.description,
            is_private: room.is_private,
            created_by: Some(room.created_by),
            created_at: now,
            updated_at: now,
        };

        let row = RoomRow::from_model(&room);
        self.blocking(move |db| db.insert_room(&row)).await?;
        info!("Room '{}' ({}) created", room.name, room.id);
        Ok(room)
    }

    async fn upsert_room(&self, room: Room) -> BackendResult<Room> {
        self.require_session()?;
        let row = RoomRow::from_model(&room);
        self.blocking(move |db| db.upsert_room(&row)?.into_model()).await
    }

    async fn upsert_membership(&self, room_id: Uuid, user_id: Uuid) -> BackendResult<RoomMember> {
        self.require_owner(user_id, "room_members")?;
        let now = format_ts(Utc::now());

        self.blocking(move |db| {
            db.upsert_membership(&room_id.to_string(), &user_id.to_string(), &now)?
                .into_model()
        })
        .await
    }

    async fn insert_membership(&self, room_id: Uuid, user_id: Uuid) -> BackendResult<RoomMember> {
        self.require_owner(user_id, "room_members")?;
        let now = format_ts(Utc::now());

        self.blocking(move |db| {
            db.insert_membership(&room_id.to_string(), &user_id.to_string(), &now)?
                .map(|row| row.into_model())
                .transpose()
        })
        .await?
        .ok_or_else(|| {
            BackendError::Conflict(
                "duplicate key value violates unique constraint \"room_members_pkey\"".into(),
            )
        })
    }

    async fn delete_membership(&self, room_id: Uuid, user_id: Uuid) -> BackendResult<()> {
        self.require_owner(user_id, "room_members")?;

        let removed = self
            .blocking(move |db| db.delete_membership(&room_id.to_string(), &user_id.to_string()))
            .await?;
        debug!("Removed {} membership row(s) for {} in {}", removed, user_id, room_id);
        Ok(())
    }

    async fn recent_messages(&self, room_id: Uuid, limit: u32) -> BackendResult<Vec<MessageWithSender>> {
        self.blocking(move |db| {
            db.get_recent_messages(&room_id.to_string(), limit)?
                .into_iter()
                .map(|row| row.into_model())
                .collect()
        })
        .await
    }

    async fn message_with_sender(&self, message_id: Uuid) -> BackendResult<Option<MessageWithSender>> {
        self.blocking(move |db| {
            db.get_message_with_sender(&message_id.to_string())?
                .map(|row| row.into_model())
                .transpose()
        })
        .await
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message> {
        self.require_owner(message.user_id, "messages")?;

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            room_id: message.room_id,
            user_id: message.user_id,
            content: message.content,
            created_at: now,
            updated_at: now,
        };

        let row = MessageRow {
            id: message.id.to_string(),
            room_id: message.room_id.to_string(),
            user_id: message.user_id.to_string(),
            content: message.content.clone(),
            created_at: format_ts(now),
            updated_at: format_ts(now),
        };
        self.blocking(move |db| db.insert_message(&row)).await?;

        let receivers = self.feed.publish(MessageInserted {
            id: message.id,
            room_id: message.room_id,
        });
        debug!("Message {} published to {} subscription(s)", message.id, receivers);
        Ok(message)
    }

    async fn subscribe_message_inserts(&self, room_id: Uuid) -> BackendResult<Subscription> {
        let subscription = self.feed.subscribe(room_id);
        debug!("Subscription {} acknowledged for room {}", subscription.handle.id(), room_id);
        Ok(subscription)
    }
}

impl AuthBackend for LocalBackend {
    async fn sign_up(
        &self,
        identity_key: &str,
        secret: &str,
        metadata: SignUpMetadata,
    ) -> BackendResult<AuthUser> {
        let identity_key = identity_key.to_string();
        let secret = secret.to_string();

        let user = self
            .blocking(move |db| {
                if db.get_account_by_identity(&identity_key)?.is_some() {
                    return Ok(Err(BackendError::Conflict("User already registered".into())));
                }
                if db.username_taken(&metadata.username)? {
                    return Ok(Err(BackendError::Conflict("Username already taken".into())));
                }

                let secret_hash = secrets::hash_secret(&secret)?;
                let id = Uuid::new_v4();
                db.create_account(
                    &id.to_string(),
                    &identity_key,
                    &secret_hash,
                    &metadata.username,
                    &format_ts(Utc::now()),
                )?;

                Ok(Ok(AuthUser { id, identity_key }))
            })
            .await??;

        info!("Account {} registered ({})", user.identity_key, user.id);
        Ok(user)
    }

    async fn sign_in_with_secret(&self, identity_key: &str, secret: &str) -> BackendResult<AuthUser> {
        let identity_key = identity_key.to_string();
        let secret = secret.to_string();

        let user = self
            .blocking(move |db| {
                let Some(account) = db.get_account_by_identity(&identity_key)? else {
                    return Ok(None);
                };
                if !secrets::verify_secret(&secret, &account.secret_hash)? {
                    return Ok(None);
                }
                Ok(Some(AuthUser {
                    id: account.id.parse()?,
                    identity_key: account.identity_key,
                }))
            })
            .await?
            .ok_or_else(|| BackendError::Unauthorized(INVALID_CREDENTIALS.into()))?;

        self.set_session(Some(user.clone()));
        let _ = self.session_tx.send(SessionEvent::SignedIn(user.clone()));
        info!("{} signed in", user.identity_key);
        Ok(user)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if let Some(user) = self.session_user() {
            info!("{} signed out", user.identity_key);
        }
        self.set_session(None);
        let _ = self.session_tx.send(SessionEvent::SignedOut);
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.session_user()
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }
}
