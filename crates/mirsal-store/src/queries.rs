use crate::models::{
    AccountRow, MemberRow, MessageRow, MessageWithSenderRow, ProfileRow, RoomRow,
};
use crate::Database;
use anyhow::Result;
use mirsal_types::api::ProfileUpdate;
use rusqlite::{Connection, Row};

const PROFILE_COLUMNS: &str =
    "id, username, display_name, avatar_url, status, theme, created_at, updated_at";

const ROOM_COLUMNS: &str = "id, name, description, is_private, created_by, created_at, updated_at";

// JOIN profiles to hydrate the author in the same query
const MESSAGE_WITH_SENDER_SELECT: &str =
    "SELECT m.id, m.room_id, m.user_id, m.content, m.created_at, m.updated_at,
            p.id, p.username, p.display_name, p.avatar_url, p.status, p.theme, p.created_at, p.updated_at
     FROM messages m
     JOIN profiles p ON p.id = m.user_id";

impl Database {
    // -- Accounts --

    /// Creates the account and its profile in one transaction.
    pub fn create_account(
        &self,
        id: &str,
        identity_key: &str,
        secret_hash: &str,
        username: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO accounts (id, identity_key, secret_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, identity_key, secret_hash, now),
            )?;
            tx.execute(
                "INSERT INTO profiles (id, username, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                (id, username, now),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_account_by_identity(&self, identity_key: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, identity_key, secret_hash, created_at FROM accounts WHERE identity_key = ?1",
                [identity_key],
                |row| {
                    Ok(AccountRow {
                        id: row.get(0)?,
                        identity_key: row.get(1)?,
                        secret_hash: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Profiles --

    pub fn username_taken(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM profiles WHERE username = ?1", [username], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, id))
    }

    /// Patch the given columns, leaving `None` fields untouched.
    /// Returns the updated row, or `None` when the profile does not exist.
    pub fn update_profile(&self, id: &str, patch: &ProfileUpdate, now: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET
                    display_name = COALESCE(?2, display_name),
                    avatar_url   = COALESCE(?3, avatar_url),
                    status       = COALESCE(?4, status),
                    theme        = COALESCE(?5, theme),
                    updated_at   = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    patch.display_name,
                    patch.avatar_url,
                    patch.status,
                    patch.theme.map(|theme| theme.as_str()),
                    now,
                ],
            )?;

            if changed == 0 {
                return Ok(None);
            }
            query_profile(conn, id)
        })
    }

    // -- Rooms --

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
                [id],
                room_from_row,
            )
            .optional()
        })
    }

    /// All rooms with their membership counts, newest first.
    pub fn list_rooms_with_member_count(&self) -> Result<Vec<(RoomRow, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.description, r.is_private, r.created_by, r.created_at, r.updated_at,
                        COUNT(m.user_id)
                 FROM rooms r
                 LEFT JOIN room_members m ON m.room_id = r.id
                 GROUP BY r.id
                 ORDER BY r.created_at DESC, r.rowid DESC",
            )?;

            let rows = stmt
                .query_map([], |row| Ok((room_from_row(row)?, row.get::<_, i64>(7)? as u64)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn insert_room(&self, room: &RoomRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO rooms ({ROOM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                rusqlite::params![
                    room.id,
                    room.name,
                    room.description,
                    room.is_private,
                    room.created_by,
                    room.created_at,
                    room.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Insert or overwrite the descriptive columns of a room by id.
    /// `created_at` and `created_by` of an existing row are preserved.
    pub fn upsert_room(&self, room: &RoomRow) -> Result<RoomRow> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO rooms ({ROOM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        name        = excluded.name,
                        description = excluded.description,
                        is_private  = excluded.is_private,
                        updated_at  = excluded.updated_at"
                ),
                rusqlite::params![
                    room.id,
                    room.name,
                    room.description,
                    room.is_private,
                    room.created_by,
                    room.created_at,
                    room.updated_at,
                ],
            )?;

            Ok(conn.query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
                [&room.id],
                room_from_row,
            )?)
        })
    }

    // -- Memberships --

    /// Idempotent: an existing membership is returned unchanged.
    pub fn upsert_membership(&self, room_id: &str, user_id: &str, now: &str) -> Result<MemberRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(room_id, user_id) DO NOTHING",
                (room_id, user_id, now),
            )?;
            Ok(conn.query_row(
                "SELECT room_id, user_id, joined_at FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id),
                member_from_row,
            )?)
        })
    }

    /// Returns `None` when the membership already existed.
    pub fn insert_membership(&self, room_id: &str, user_id: &str, now: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                (room_id, user_id, now),
            )?;

            if inserted == 0 {
                return Ok(None);
            }
            Ok(Some(MemberRow {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                joined_at: now.to_string(),
            }))
        })
    }

    /// Returns the number of rows removed (0 or 1).
    pub fn delete_membership(&self, room_id: &str, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id),
            )?)
        })
    }

    #[cfg(test)]
    pub fn count_memberships(&self, room_id: &str, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id),
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, user_id, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id,
                    message.room_id,
                    message.user_id,
                    message.content,
                    message.created_at,
                    message.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// The `limit` newest messages of a room, returned oldest first.
    pub fn get_recent_messages(&self, room_id: &str, limit: u32) -> Result<Vec<MessageWithSenderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_WITH_SENDER_SELECT}
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2"
            ))?;

            let mut rows = stmt
                .query_map(rusqlite::params![room_id, limit], message_with_sender_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }

    pub fn get_message_with_sender(&self, id: &str) -> Result<Option<MessageWithSenderRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{MESSAGE_WITH_SENDER_SELECT} WHERE m.id = ?1"),
                [id],
                message_with_sender_from_row,
            )
            .optional()
        })
    }

    #[cfg(test)]
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0))
    }
}

fn query_profile(conn: &Connection, id: &str) -> Result<Option<ProfileRow>> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
        [id],
        |row| profile_from_row(row, 0),
    )
    .optional()
}

fn profile_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        display_name: row.get(offset + 2)?,
        avatar_url: row.get(offset + 3)?,
        status: row.get(offset + 4)?,
        theme: row.get(offset + 5)?,
        created_at: row.get(offset + 6)?,
        updated_at: row.get(offset + 7)?,
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_private: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        room_id: row.get(0)?,
        user_id: row.get(1)?,
        joined_at: row.get(2)?,
    })
}

fn message_with_sender_from_row(row: &Row<'_>) -> rusqlite::Result<MessageWithSenderRow> {
    Ok(MessageWithSenderRow {
        message: MessageRow {
            id: row.get(0)?,
            room_id: row.get(1)?,
            user_id: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        },
        sender: profile_from_row(row, 6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
