//! Chat session coordinator.
//!
//! Owns the current room, its message list and the single live
//! subscription feeding that list. Room switches (`join_room`,
//! `leave_room`, `reset`) run one at a time under `switch_lock`; every
//! join also takes a ticket from `latest_switch` so that a join overtaken
//! by a newer one throws its results away instead of committing them.
//!
//! A switch is committed in one step under the state lock: the new room,
//! the freshly loaded messages and the new subscription go in together
//! and the old subscription is dropped. Pushed messages carry the
//! generation of the subscription that delivered them and are only
//! appended while that generation is still current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use mirsal_types::api::{NewMessage, NewRoom};
use mirsal_types::backend::Backend;
use mirsal_types::events::{ChatEvent, MessageInserted};
use mirsal_types::models::{Message, MessageWithSender, Room, RoomWithMemberCount};

use crate::directory::RoomDirectory;
use crate::error::{ChatError, JoinPhase, JoinRoomError, ValidationError};
use crate::session::SessionContext;
use crate::subscription::{LiveSubscription, SubscriptionState};

pub const DEFAULT_MESSAGE_WINDOW: u32 = 50;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How many of the most recent messages a join loads.
    pub message_window: u32,
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            message_window: DEFAULT_MESSAGE_WINDOW,
            event_capacity: 256,
        }
    }
}

/// Result of a join that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined(Room),
    /// A newer switch was requested while this one was in flight; nothing
    /// was committed.
    Superseded,
}

#[derive(Default)]
struct ChatState {
    current_room: Option<Room>,
    messages: Vec<MessageWithSender>,
    live: Option<LiveSubscription>,
    /// Room of a subscribe call that has not been acknowledged yet.
    pending_subscribe: Option<Uuid>,
    loading: bool,
    generation: u64,
}

struct Inner<B> {
    backend: Arc<B>,
    session: SessionContext,
    directory: RoomDirectory<B>,
    config: CoordinatorConfig,
    state: RwLock<ChatState>,
    switch_lock: Mutex<()>,
    latest_switch: AtomicU64,
    events_tx: broadcast::Sender<ChatEvent>,
}

pub struct ChatCoordinator<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for ChatCoordinator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Backend> ChatCoordinator<B> {
    pub fn new(
        backend: Arc<B>,
        session: SessionContext,
        directory: RoomDirectory<B>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                backend,
                session,
                directory,
                config,
                state: RwLock::new(ChatState::default()),
                switch_lock: Mutex::new(()),
                latest_switch: AtomicU64::new(0),
                events_tx,
            }),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn directory(&self) -> &RoomDirectory<B> {
        &self.inner.directory
    }

    pub async fn current_room(&self) -> Option<Room> {
        self.inner.state.read().await.current_room.clone()
    }

    pub async fn messages(&self) -> Vec<MessageWithSender> {
        self.inner.state.read().await.messages.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.read().await.loading
    }

    pub async fn subscription_state(&self) -> SubscriptionState {
        let state = self.inner.state.read().await;
        match (&state.live, state.pending_subscribe) {
            (Some(live), _) => SubscriptionState::Active {
                room_id: live.room_id(),
            },
            (None, Some(room_id)) => SubscriptionState::Subscribing { room_id },
            (None, None) => SubscriptionState::Unsubscribed,
        }
    }

    /// Id of the backend subscription currently feeding the message list.
    pub async fn active_subscription_id(&self) -> Option<Uuid> {
        self.inner.state.read().await.live.as_ref().map(LiveSubscription::id)
    }

    pub async fn rooms(&self) -> Vec<RoomWithMemberCount> {
        self.inner.directory.rooms().await
    }

    /// Make `room_id` the current room: record membership, load its most
    /// recent messages and open a live subscription for it.
    ///
    /// On error nothing local changes. If another switch is requested
    /// while this one is in flight, this one returns
    /// [`JoinOutcome::Superseded`] without committing.
    pub async fn join_room(&self, room_id: Uuid) -> Result<JoinOutcome, JoinRoomError> {
        let inner = &self.inner;
        let ticket = inner.latest_switch.fetch_add(1, Ordering::SeqCst) + 1;
        let _switch = inner.switch_lock.lock().await;

        if inner.is_superseded(ticket) {
            debug!("Join of {} superseded before it started", room_id);
            return Ok(JoinOutcome::Superseded);
        }

        let Some(profile) = inner.session.profile().await else {
            warn!("Join of {} without a signed-in profile", room_id);
            return Err(JoinRoomError::NotAuthenticated);
        };

        inner.set_loading(true).await;
        let result = self.switch_to(room_id, profile.id, ticket).await;

        match &result {
            Ok(JoinOutcome::Joined(room)) => {
                info!("{} joined room '{}' ({})", profile.username, room.name, room.id);
            }
            Ok(JoinOutcome::Superseded) => {
                // The newer switch is queued behind us and clears the flag itself.
                debug!("Join of {} superseded, results discarded", room_id);
            }
            Err(e) => {
                error!("{} failed to join {}: {}", profile.username, room_id, e);
                inner.state.write().await.pending_subscribe = None;
                if !inner.is_superseded(ticket) {
                    inner.set_loading(false).await;
                }
            }
        }
        result
    }

    async fn switch_to(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        ticket: u64,
    ) -> Result<JoinOutcome, JoinRoomError> {
        let inner = &self.inner;
        let backend = &inner.backend;

        let room = backend
            .room(room_id)
            .await
            .map_err(JoinRoomError::at(JoinPhase::Lookup))?
            .ok_or(JoinRoomError::NotFound(room_id))?;

        backend
            .upsert_membership(room_id, user_id)
            .await
            .map_err(JoinRoomError::at(JoinPhase::MembershipWrite))?;

        // Subscribe before loading so that an insert landing between the two
        // is buffered; `append` skips ids the load already returned.
        inner.state.write().await.pending_subscribe = Some(room_id);
        let subscription = backend
            .subscribe_message_inserts(room_id)
            .await
            .map_err(JoinRoomError::at(JoinPhase::Subscribe))?;

        let messages = match backend.recent_messages(room_id, inner.config.message_window).await {
            Ok(messages) => messages,
            Err(e) => {
                subscription.handle.unsubscribe();
                return Err(JoinRoomError::at(JoinPhase::MessageLoad)(e));
            }
        };
        debug!("Loaded {} message(s) for room {}", messages.len(), room_id);

        let old = {
            let mut state = inner.state.write().await;
            if inner.is_superseded(ticket) {
                state.pending_subscribe = None;
                drop(state);
                subscription.handle.unsubscribe();
                return Ok(JoinOutcome::Superseded);
            }

            state.generation += 1;
            let generation = state.generation;
            let delivery = deliver(Arc::downgrade(inner), room_id, generation, subscription.inserts);
            let old = state
                .live
                .replace(LiveSubscription::spawn(subscription.handle, generation, delivery));

            state.current_room = Some(room.clone());
            state.messages = messages;
            state.pending_subscribe = None;
            state.loading = false;
            old
        };
        drop(old);

        inner.emit(ChatEvent::RoomChanged(Some(room.clone())));
        inner.emit(ChatEvent::Loading(false));
        Ok(JoinOutcome::Joined(room))
    }

    /// Drop the caller's membership of `room_id`. Local state is cleared
    /// only when `room_id` is the current room.
    pub async fn leave_room(&self, room_id: Uuid) -> Result<(), ChatError> {
        let inner = &self.inner;
        let _switch = inner.switch_lock.lock().await;

        let user_id = inner.session.user_id().await.ok_or(ChatError::NotAuthenticated)?;

        inner
            .backend
            .delete_membership(room_id, user_id)
            .await
            .map_err(|e| {
                error!("Failed to leave room {}: {}", room_id, e);
                ChatError::from(e)
            })?;
        info!("{} left room {}", user_id, room_id);

        let old = {
            let mut state = inner.state.write().await;
            if state.current_room.as_ref().map(|r| r.id) == Some(room_id) {
                state.generation += 1;
                state.current_room = None;
                state.messages.clear();
                state.live.take()
            } else {
                None
            }
        };
        if old.is_some() {
            drop(old);
            inner.emit(ChatEvent::RoomChanged(None));
        }

        if let Err(e) = self.refresh_rooms().await {
            warn!("Room list refresh after leaving {} failed: {}", room_id, e);
        }
        Ok(())
    }

    /// Insert a message into the current room. Returns `Ok(None)` when
    /// there is no current room or no signed-in profile. The message shows
    /// up in the list only once the live subscription delivers it.
    pub async fn send_message(&self, content: &str) -> Result<Option<Message>, ChatError> {
        let inner = &self.inner;
        let room_id = inner.state.read().await.current_room.as_ref().map(|r| r.id);
        let (Some(room_id), Some(profile)) = (room_id, inner.session.profile().await) else {
            debug!("Send ignored: no current room or profile");
            return Ok(None);
        };

        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let message = inner
            .backend
            .insert_message(NewMessage {
                room_id,
                user_id: profile.id,
                content: content.to_string(),
            })
            .await
            .map_err(|e| {
                error!("Failed to send message to {}: {}", room_id, e);
                ChatError::from(e)
            })?;
        trace!("Message {} sent to {}", message.id, room_id);
        Ok(Some(message))
    }

    /// Create a room and make the caller its first member. The current room
    /// does not change.
    ///
    /// If the membership write fails the room is kept and
    /// [`ChatError::PartialFailure`] carries it.
    pub async fn create_room(
        &self,
        name: &str,
        description: Option<&str>,
        is_private: bool,
    ) -> Result<Room, ChatError> {
        let inner = &self.inner;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyRoomName.into());
        }
        let user_id = inner.session.user_id().await.ok_or(ChatError::NotAuthenticated)?;

        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let room = inner
            .backend
            .insert_room(NewRoom {
                name: name.to_string(),
                description,
                is_private,
                created_by: user_id,
            })
            .await
            .map_err(|e| {
                error!("Failed to create room '{}': {}", name, e);
                ChatError::from(e)
            })?;

        if let Err(source) = inner.backend.insert_membership(room.id, user_id).await {
            error!("Room {} created but joining it failed: {}", room.id, source);
            return Err(ChatError::PartialFailure {
                room: Box::new(room),
                source,
            });
        }
        info!("Room '{}' ({}) created by {}", room.name, room.id, user_id);

        if let Err(e) = self.refresh_rooms().await {
            warn!("Room list refresh after creating {} failed: {}", room.id, e);
        }
        Ok(room)
    }

    pub async fn refresh_rooms(&self) -> Result<usize, ChatError> {
        let count = self.inner.directory.refresh().await?;
        self.inner.emit(ChatEvent::RoomsRefreshed { count });
        Ok(count)
    }

    /// Forget the current room, its messages and the live subscription.
    /// Any join still in flight is superseded.
    pub async fn reset(&self) {
        let inner = &self.inner;
        inner.latest_switch.fetch_add(1, Ordering::SeqCst);
        let _switch = inner.switch_lock.lock().await;

        let (old, had_room, was_loading) = {
            let mut state = inner.state.write().await;
            let had_room = state.current_room.take().is_some();
            state.generation += 1;
            state.messages.clear();
            state.pending_subscribe = None;
            let was_loading = std::mem::replace(&mut state.loading, false);
            (state.live.take(), had_room, was_loading)
        };
        drop(old);

        if had_room {
            inner.emit(ChatEvent::RoomChanged(None));
        }
        if was_loading {
            inner.emit(ChatEvent::Loading(false));
        }
        debug!("Chat state reset");
    }
}

impl<B> Inner<B> {
    fn is_superseded(&self, ticket: u64) -> bool {
        self.latest_switch.load(Ordering::SeqCst) != ticket
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn set_loading(&self, loading: bool) {
        self.state.write().await.loading = loading;
        self.emit(ChatEvent::Loading(loading));
    }

    /// Second phase of the delivery pipeline. Drops the message if its
    /// subscription has been replaced or it is already in the list.
    async fn append(&self, generation: u64, message: MessageWithSender) {
        let mut state = self.state.write().await;
        let current = state.current_room.as_ref().map(|r| r.id);
        if state.generation != generation || current != Some(message.room_id()) {
            trace!("Dropping message {} from superseded subscription", message.id());
            return;
        }
        if state.messages.iter().any(|m| m.id() == message.id()) {
            trace!("Message {} already present", message.id());
            return;
        }

        state.messages.push(message.clone());
        drop(state);
        self.emit(ChatEvent::MessageAppended(message));
    }
}

/// Drains one subscription: each notification is hydrated into a full
/// message with its sender, then appended in arrival order.
async fn deliver<B: Backend>(
    inner: Weak<Inner<B>>,
    room_id: Uuid,
    generation: u64,
    mut inserts: mpsc::UnboundedReceiver<MessageInserted>,
) {
    while let Some(inserted) = inserts.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        if inserted.room_id != room_id {
            continue;
        }

        let message = match inner.backend.message_with_sender(inserted.id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Message {} vanished before hydration, dropping", inserted.id);
                continue;
            }
            Err(e) => {
                warn!("Failed to hydrate message {}: {}", inserted.id, e);
                continue;
            }
        };

        inner.append(generation, message).await;
    }
    trace!("Delivery for room {} (generation {}) finished", room_id, generation);
}
