use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Theme;

// -- Auth --

/// Metadata attached to a new account. The backend creates the profile row from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignUpMetadata {
    pub username: String,
}

// -- Rooms --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRoom {
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Uuid,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
}

// -- Profiles --

/// Partial profile update. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub theme: Option<Theme>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.avatar_url.is_none()
            && self.status.is_none()
            && self.theme.is_none()
    }
}
