//! SQLite row types and their conversions to the shared models.
//! Distinct from mirsal-types models to keep the DB layer independent.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use mirsal_types::models::{Message, MessageWithSender, Profile, Room, RoomMember, Theme};

pub struct AccountRow {
    pub id: String,
    pub identity_key: String,
    pub secret_hash: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: String,
    pub theme: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MemberRow {
    pub room_id: String,
    pub user_id: String,
    pub joined_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

/// `messages` joined with `profiles` on the author.
pub struct MessageWithSenderRow {
    pub message: MessageRow,
    pub sender: ProfileRow,
}

/// Timestamps are stored as RFC 3339 with a fixed precision and `Z` suffix
/// so that text ordering matches chronological ordering.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

impl ProfileRow {
    pub fn into_model(self) -> Result<Profile> {
        let theme = self.theme.parse::<Theme>().unwrap_or_else(|e| {
            tracing::warn!("Profile {} has {}; using default", self.id, e);
            Theme::default()
        });

        Ok(Profile {
            id: parse_id(&self.id)?,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            status: self.status,
            theme,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

impl RoomRow {
    pub fn from_model(room: &Room) -> Self {
        Self {
            id: room.id.to_string(),
            name: room.name.clone(),
            description: room.description.clone(),
            is_private: room.is_private,
            created_by: room.created_by.map(|id| id.to_string()),
            created_at: format_ts(room.created_at),
            updated_at: format_ts(room.updated_at),
        }
    }

    pub fn into_model(self) -> Result<Room> {
        Ok(Room {
            id: parse_id(&self.id)?,
            name: self.name,
            description: self.description,
            is_private: self.is_private,
            created_by: self.created_by.as_deref().map(parse_id).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

impl MemberRow {
    pub fn into_model(self) -> Result<RoomMember> {
        Ok(RoomMember {
            room_id: parse_id(&self.room_id)?,
            user_id: parse_id(&self.user_id)?,
            joined_at: parse_ts(&self.joined_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            room_id: parse_id(&self.room_id)?,
            user_id: parse_id(&self.user_id)?,
            content: self.content,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

impl MessageWithSenderRow {
    pub fn into_model(self) -> Result<MessageWithSender> {
        Ok(MessageWithSender {
            message: self.message.into_model()?,
            sender: self.sender.into_model()?,
        })
    }
}
