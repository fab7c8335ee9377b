use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use mirsal_types::backend::BackendError;
use mirsal_types::models::Room;

/// Coarse classification shared by every error the client surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Auth,
    Validation,
    Network,
    PartialFailure,
}

/// Input rejected locally, before any backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Room name must not be empty")]
    EmptyRoomName,
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Username and password are required")]
    MissingCredentials,
    #[error("Username can only contain letters, numbers, and underscores")]
    InvalidUsername,
    #[error("Password must be at least {min} characters long")]
    SecretTooShort { min: usize },
}

/// Step of `join_room` that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    Lookup,
    MembershipWrite,
    MessageLoad,
    Subscribe,
}

impl fmt::Display for JoinPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinPhase::Lookup => "lookup",
            JoinPhase::MembershipWrite => "membership-write",
            JoinPhase::MessageLoad => "message-load",
            JoinPhase::Subscribe => "subscribe",
        })
    }
}

#[derive(Debug, Error)]
pub enum JoinRoomError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("room {0} not found")]
    NotFound(Uuid),
    #[error("joining room failed during {phase}: {source}")]
    Backend {
        phase: JoinPhase,
        #[source]
        source: BackendError,
    },
}

impl JoinRoomError {
    pub(crate) fn at(phase: JoinPhase) -> impl FnOnce(BackendError) -> Self {
        move |source| JoinRoomError::Backend { phase, source }
    }

    pub fn phase(&self) -> Option<JoinPhase> {
        match self {
            JoinRoomError::NotAuthenticated => None,
            JoinRoomError::NotFound(_) => Some(JoinPhase::Lookup),
            JoinRoomError::Backend { phase, .. } => Some(*phase),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JoinRoomError::NotAuthenticated => ErrorKind::Auth,
            JoinRoomError::NotFound(_) => ErrorKind::NotFound,
            JoinRoomError::Backend { source, .. } => backend_kind(source),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Join(#[from] JoinRoomError),
    /// The room row exists but the creator's membership was not written.
    #[error("room {} was created but joining it failed: {source}", .room.id)]
    PartialFailure {
        room: Box<Room>,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::NotAuthenticated => ErrorKind::Auth,
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::Join(err) => err.kind(),
            ChatError::PartialFailure { .. } => ErrorKind::PartialFailure,
            ChatError::Backend(err) => backend_kind(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AuthError {
    /// Backend-provided message when there is one, else `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            AuthError::Validation(err) => err.to_string(),
            AuthError::Backend(err) => err.user_message().unwrap_or(fallback).to_string(),
            AuthError::NotAuthenticated => fallback.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::NotAuthenticated => ErrorKind::Auth,
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Backend(err) => backend_kind(err),
        }
    }
}

fn backend_kind(err: &BackendError) -> ErrorKind {
    match err {
        BackendError::NotFound => ErrorKind::NotFound,
        BackendError::Unauthorized(_) | BackendError::Forbidden(_) => ErrorKind::Auth,
        BackendError::Conflict(_) | BackendError::Request(_) => ErrorKind::Network,
    }
}
