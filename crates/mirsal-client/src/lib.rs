pub mod auth;
pub mod bootstrap;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod session;
pub mod settings;
pub mod subscription;

use std::sync::Arc;

use tracing::{info, warn};

use mirsal_types::backend::{AuthBackend, Backend};

pub use auth::AuthService;
pub use coordinator::{ChatCoordinator, CoordinatorConfig, JoinOutcome};
pub use directory::RoomDirectory;
pub use error::{AuthError, ChatError, ErrorKind, JoinPhase, JoinRoomError, ValidationError};
pub use session::{Session, SessionContext};
pub use subscription::SubscriptionState;

/// Everything one signed-in client needs, wired to a single backend
/// connection: session context, auth service and chat coordinator.
pub struct ChatClient<B> {
    backend: Arc<B>,
    session: SessionContext,
    auth: AuthService<B>,
    chat: ChatCoordinator<B>,
}

impl<B: Backend + AuthBackend> ChatClient<B> {
    pub fn new(backend: Arc<B>, config: CoordinatorConfig) -> Self {
        let session = SessionContext::new();
        let auth = AuthService::new(backend.clone(), session.clone());
        let directory = RoomDirectory::new(backend.clone());
        let chat = ChatCoordinator::new(backend.clone(), session.clone(), directory, config);
        Self {
            backend,
            session,
            auth,
            chat,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn auth(&self) -> &AuthService<B> {
        &self.auth
    }

    pub fn chat(&self) -> &ChatCoordinator<B> {
        &self.chat
    }

    /// Resume a session the backend already holds and load the room list.
    pub async fn start(&self) -> Option<Session> {
        let session = self.auth.restore().await?;
        if let Err(e) = self.chat.refresh_rooms().await {
            warn!("Initial room refresh failed: {}", e);
        }
        Some(session)
    }

    pub async fn sign_up(&self, username: &str, secret: &str) -> Result<Session, AuthError> {
        let session = self.auth.sign_up(username, secret).await?;
        self.after_sign_in().await;
        Ok(session)
    }

    pub async fn sign_in(&self, username: &str, secret: &str) -> Result<Session, AuthError> {
        let session = self.auth.sign_in(username, secret).await?;
        self.after_sign_in().await;
        Ok(session)
    }

    /// Drop the current room, its subscription and the room list, then end
    /// the backend session.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.chat.reset().await;
        self.chat.directory().clear().await;
        self.auth.sign_out().await
    }

    /// Land in the chat: load rooms, seed the default ones if there are
    /// none, then join the newest room. Returns `None` when there is still
    /// nothing to join.
    pub async fn enter_chat(&self) -> Result<Option<JoinOutcome>, ChatError> {
        let user_id = self.session.user_id().await.ok_or(ChatError::NotAuthenticated)?;

        self.chat.refresh_rooms().await?;
        if self.chat.directory().is_empty().await {
            info!("No rooms yet, creating the default ones");
            bootstrap::seed_default_rooms(self.backend.as_ref(), user_id).await;
            self.chat.refresh_rooms().await?;
        }

        let Some(first) = self.chat.rooms().await.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(self.chat.join_room(first.room.id).await?))
    }

    async fn after_sign_in(&self) {
        if let Err(e) = self.chat.refresh_rooms().await {
            warn!("Room refresh after sign-in failed: {}", e);
        }
    }
}
