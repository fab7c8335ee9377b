use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use mirsal_types::events::AuthUser;
use mirsal_types::models::Profile;

/// The signed-in account and its profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: AuthUser,
    /// `None` until the backend has produced the profile row.
    pub profile: Option<Profile>,
}

impl Session {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }
}

/// Shared, explicitly passed session state. Cloning shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    pub async fn user_id(&self) -> Option<Uuid> {
        self.inner.read().await.as_ref().map(Session::user_id)
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.inner.read().await.as_ref().and_then(|s| s.profile.clone())
    }

    pub async fn is_signed_in(&self) -> bool {
        self.inner.read().await.is_some()
    }

    pub(crate) async fn set(&self, session: Option<Session>) {
        *self.inner.write().await = session;
    }

    /// Replace the stored profile if it belongs to the current session.
    pub(crate) async fn replace_profile(&self, profile: Profile) {
        if let Some(session) = self.inner.write().await.as_mut() {
            if session.user.id == profile.id {
                session.profile = Some(profile);
            }
        }
    }
}
