//! Shared fixtures: an embedded backend wrapped with knobs for slowing
//! down or failing individual calls.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use mirsal_client::{ChatClient, CoordinatorConfig};
use mirsal_store::LocalBackend;
use mirsal_types::api::{NewMessage, NewRoom, ProfileUpdate, SignUpMetadata};
use mirsal_types::backend::{AuthBackend, Backend, BackendError, BackendResult, Subscription};
use mirsal_types::events::{AuthUser, ChatEvent, SessionEvent};
use mirsal_types::models::{
    Message, MessageWithSender, Profile, Room, RoomMember, RoomWithMemberCount,
};

pub const SECRET: &str = "sandstorm";

pub struct ScriptedBackend {
    pub local: LocalBackend,
    load_delays: Mutex<HashMap<Uuid, Duration>>,
    pub fail_membership_insert: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_message_load: AtomicBool,
    /// Inserted into the room while its messages are being loaded: the
    /// `bool` says whether before the query runs or after it returns.
    load_inserts: Mutex<HashMap<Uuid, (NewMessage, bool)>>,
    /// Messages with these contents look deleted by the time they are hydrated.
    vanished: Mutex<HashSet<String>>,
    pub message_inserts: AtomicUsize,
    pub subscribes: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(local: LocalBackend) -> Self {
        Self {
            local,
            load_delays: Mutex::new(HashMap::new()),
            fail_membership_insert: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_message_load: AtomicBool::new(false),
            load_inserts: Mutex::new(HashMap::new()),
            vanished: Mutex::new(HashSet::new()),
            message_inserts: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
        }
    }

    /// Make loading `room_id`'s messages take `delay`.
    pub fn delay_message_load(&self, room_id: Uuid, delay: Duration) {
        self.load_delays.lock().unwrap().insert(room_id, delay);
    }

    /// Insert `message` into its room while that room is being loaded,
    /// ahead of the query or just after it has returned.
    pub fn insert_during_load(&self, message: NewMessage, after_query: bool) {
        self.load_inserts
            .lock()
            .unwrap()
            .insert(message.room_id, (message, after_query));
    }

    /// Make hydration of any message with `content` come back empty.
    pub fn vanish_on_hydrate(&self, content: &str) {
        self.vanished.lock().unwrap().insert(content.to_string());
    }

    fn load_delay(&self, room_id: Uuid) -> Option<Duration> {
        self.load_delays.lock().unwrap().get(&room_id).copied()
    }
}

impl Backend for ScriptedBackend {
    async fn profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>> {
        self.local.profile(user_id).await
    }

    async fn update_profile(&self, user_id: Uuid, patch: ProfileUpdate) -> BackendResult<Profile> {
        self.local.update_profile(user_id, patch).await
    }

    async fn room(&self, room_id: Uuid) -> BackendResult<Option<Room>> {
        self.local.room(room_id).await
    }

    async fn rooms_with_member_count(&self) -> BackendResult<Vec<RoomWithMemberCount>> {
        self.local.rooms_with_member_count().await
    }

    async fn insert_room(&self, room: NewRoom) -> BackendResult<Room> {
        self.local.insert_room(room).await
    }

    async fn upsert_room(&self, room: Room) -> BackendResult<Room> {
        self.local.upsert_room(room).await
    }

    async fn upsert_membership(&self, room_id: Uuid, user_id: Uuid) -> BackendResult<RoomMember> {
        self.local.upsert_membership(room_id, user_id).await
    }

    async fn insert_membership(&self, room_id: Uuid, user_id: Uuid) -> BackendResult<RoomMember> {
        if self.fail_membership_insert.load(Ordering::SeqCst) {
            return Err(BackendError::Request("connection reset".into()));
        }
        self.local.insert_membership(room_id, user_id).await
    }

    async fn delete_membership(&self, room_id: Uuid, user_id: Uuid) -> BackendResult<()> {
        self.local.delete_membership(room_id, user_id).await
    }

    async fn recent_messages(&self, room_id: Uuid, limit: u32) -> BackendResult<Vec<MessageWithSender>> {
        if let Some(delay) = self.load_delay(room_id) {
            tokio::time::sleep(delay).await;
        }
        if self.fail_message_load.load(Ordering::SeqCst) {
            return Err(BackendError::Request("statement timeout".into()));
        }

        let insert = self.load_inserts.lock().unwrap().remove(&room_id);
        match insert {
            Some((message, false)) => {
                self.local.insert_message(message).await?;
                self.local.recent_messages(room_id, limit).await
            }
            Some((message, true)) => {
                let messages = self.local.recent_messages(room_id, limit).await?;
                self.local.insert_message(message).await?;
                Ok(messages)
            }
            None => self.local.recent_messages(room_id, limit).await,
        }
    }

    async fn message_with_sender(&self, message_id: Uuid) -> BackendResult<Option<MessageWithSender>> {
        let message = self.local.message_with_sender(message_id).await?;
        let vanished = self.vanished.lock().unwrap();
        Ok(message.filter(|m| !vanished.contains(&m.message.content)))
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message> {
        self.message_inserts.fetch_add(1, Ordering::SeqCst);
        self.local.insert_message(message).await
    }

    async fn subscribe_message_inserts(&self, room_id: Uuid) -> BackendResult<Subscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::Request("channel error".into()));
        }
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.local.subscribe_message_inserts(room_id).await
    }
}

impl AuthBackend for ScriptedBackend {
    async fn sign_up(
        &self,
        identity_key: &str,
        secret: &str,
        metadata: SignUpMetadata,
    ) -> BackendResult<AuthUser> {
        self.local.sign_up(identity_key, secret, metadata).await
    }

    async fn sign_in_with_secret(&self, identity_key: &str, secret: &str) -> BackendResult<AuthUser> {
        self.local.sign_in_with_secret(identity_key, secret).await
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.local.sign_out().await
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.local.current_user()
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.local.session_events()
    }
}

pub type TestClient = ChatClient<ScriptedBackend>;

pub fn client_on(local: LocalBackend) -> TestClient {
    ChatClient::new(Arc::new(ScriptedBackend::new(local)), CoordinatorConfig::default())
}

/// A fresh in-memory store and a client signed up as `username`.
pub async fn signed_up_client(username: &str) -> TestClient {
    let client = client_on(LocalBackend::in_memory().unwrap());
    client.sign_up(username, SECRET).await.unwrap();
    client
}

/// Another client on the same store as `client`, signed up as `username`.
pub async fn second_client(client: &TestClient, username: &str) -> TestClient {
    let other = client_on(client.backend().local.sibling());
    other.sign_up(username, SECRET).await.unwrap();
    other
}

pub async fn create_room(client: &TestClient, name: &str) -> Room {
    client.chat().create_room(name, None, false).await.unwrap()
}

/// Wait for the next `MessageAppended` event.
pub async fn next_appended(events: &mut broadcast::Receiver<ChatEvent>) -> MessageWithSender {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let ChatEvent::MessageAppended(message) = events.recv().await.unwrap() {
                return message;
            }
        }
    })
    .await
    .expect("no message appended within 5s")
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
