use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public account profile. Created by the backend at sign-up from the
/// sign-up metadata and only ever mutated by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: String,
    pub theme: Theme,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Name to show next to messages: the display name when set, else the username.
    pub fn shown_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership row. `(room_id, user_id)` is the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message joined with its author's profile, as rendered by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Profile,
}

impl MessageWithSender {
    pub fn id(&self) -> Uuid {
        self.message.id
    }

    pub fn room_id(&self) -> Uuid {
        self.message.room_id
    }
}

/// Read-only projection: a room plus the number of membership rows it has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomWithMemberCount {
    #[serde(flatten)]
    pub room: Room,
    pub member_count: u64,
}

/// Cosmetic colour scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dawn,
    Dusk,
    Night,
    Sunset,
    Oasis,
}

impl Theme {
    pub const ALL: [Theme; 5] = [
        Theme::Dawn,
        Theme::Dusk,
        Theme::Night,
        Theme::Sunset,
        Theme::Oasis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Dawn => "dawn",
            Theme::Dusk => "dusk",
            Theme::Night => "night",
            Theme::Sunset => "sunset",
            Theme::Oasis => "oasis",
        }
    }

    /// Style class applied to the document body, e.g. `theme-dusk`.
    pub fn class_name(self) -> String {
        format!("theme-{}", self.as_str())
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown theme: {0}")]
pub struct UnknownTheme(pub String);

impl FromStr for Theme {
    type Err = UnknownTheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Theme::ALL
            .into_iter()
            .find(|theme| theme.as_str() == s)
            .ok_or_else(|| UnknownTheme(s.to_string()))
    }
}
