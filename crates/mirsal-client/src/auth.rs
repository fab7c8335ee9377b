use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use mirsal_types::api::{ProfileUpdate, SignUpMetadata};
use mirsal_types::backend::{AuthBackend, Backend};
use mirsal_types::events::{AuthUser, SessionEvent};
use mirsal_types::models::Profile;

use crate::error::{AuthError, ValidationError};
use crate::session::{Session, SessionContext};

pub const IDENTITY_DOMAIN: &str = "mirsal.com";
pub const MIN_SECRET_LEN: usize = 6;

pub const SIGN_IN_FALLBACK: &str = "Failed to sign in. Please check your credentials.";
pub const SIGN_UP_FALLBACK: &str = "Failed to create account. Please try again.";

/// Synthetic login key for a username: lower-cased, stripped to `[a-z0-9]`,
/// under [`IDENTITY_DOMAIN`].
pub fn identity_key(username: &str) -> String {
    let local: String = username
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    format!("{}@{}", local, IDENTITY_DOMAIN)
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::MissingCredentials);
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidUsername);
    }
    // "___" is well-formed but maps to an empty identity key
    if !username.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidUsername);
    }
    Ok(())
}

pub fn validate_secret(secret: &str) -> Result<(), ValidationError> {
    if secret.is_empty() {
        return Err(ValidationError::MissingCredentials);
    }
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(ValidationError::SecretTooShort { min: MIN_SECRET_LEN });
    }
    Ok(())
}

/// Sign-up, sign-in and profile management on top of the backend's
/// credential store. Writes the outcome into the shared [`SessionContext`].
pub struct AuthService<B> {
    backend: Arc<B>,
    session: SessionContext,
}

impl<B> Clone for AuthService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            session: self.session.clone(),
        }
    }
}

impl<B: Backend + AuthBackend> AuthService<B> {
    pub fn new(backend: Arc<B>, session: SessionContext) -> Self {
        Self { backend, session }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Pick up a session the backend already holds, if any.
    pub async fn restore(&self) -> Option<Session> {
        let user = self.backend.current_user()?;
        let session = self.establish(user).await;
        info!("Restored session for {}", session.user.identity_key);
        Some(session)
    }

    /// Register a new account, then sign straight into it.
    pub async fn sign_up(&self, username: &str, secret: &str) -> Result<Session, AuthError> {
        validate_username(username)?;
        validate_secret(secret)?;

        let key = identity_key(username);
        let metadata = SignUpMetadata {
            username: username.to_string(),
        };
        if let Err(e) = self.backend.sign_up(&key, secret, metadata).await {
            warn!("Sign-up for {} failed: {}", key, e);
            return Err(e.into());
        }

        self.sign_in(username, secret).await
    }

    pub async fn sign_in(&self, username: &str, secret: &str) -> Result<Session, AuthError> {
        if username.trim().is_empty() || secret.is_empty() {
            return Err(ValidationError::MissingCredentials.into());
        }

        let key = identity_key(username);
        let user = self.backend.sign_in_with_secret(&key, secret).await.map_err(|e| {
            warn!("Sign-in for {} failed: {}", key, e);
            AuthError::from(e)
        })?;

        Ok(self.establish(user).await)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.backend.sign_out().await;
        // Local state goes regardless; a dangling backend session is harmless.
        self.session.set(None).await;
        if let Err(e) = result {
            error!("Sign-out failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Patch the signed-in profile and merge the result into the session.
    pub async fn update_profile(&self, patch: ProfileUpdate) -> Result<Profile, AuthError> {
        let user_id = self.session.user_id().await.ok_or(AuthError::NotAuthenticated)?;

        let profile = self.backend.update_profile(user_id, patch).await.map_err(|e| {
            error!("Profile update for {} failed: {}", user_id, e);
            AuthError::from(e)
        })?;
        self.session.replace_profile(profile.clone()).await;
        Ok(profile)
    }

    pub fn on_session_change(&self) -> broadcast::Receiver<SessionEvent> {
        self.backend.session_events()
    }

    async fn establish(&self, user: AuthUser) -> Session {
        let profile = match self.backend.profile(user.id).await {
            Ok(profile) => profile,
            Err(e) => {
                error!("Failed to load profile for {}: {}", user.id, e);
                None
            }
        };
        if profile.is_none() {
            warn!("No profile for {}", user.identity_key);
        }

        let session = Session { user, profile };
        self.session.set(Some(session.clone())).await;
        session
    }
}
