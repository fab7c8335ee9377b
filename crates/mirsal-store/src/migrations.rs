use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id              TEXT PRIMARY KEY,
            identity_key    TEXT NOT NULL UNIQUE,
            secret_hash     TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id              TEXT PRIMARY KEY REFERENCES accounts(id),
            username        TEXT NOT NULL UNIQUE,
            display_name    TEXT,
            avatar_url      TEXT,
            status          TEXT NOT NULL DEFAULT 'online',
            theme           TEXT NOT NULL DEFAULT 'dawn',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            description     TEXT,
            is_private      INTEGER NOT NULL DEFAULT 0,
            created_by      TEXT REFERENCES profiles(id),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rooms_created
            ON rooms(created_at);

        CREATE TABLE IF NOT EXISTS room_members (
            room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            content     TEXT NOT NULL CHECK (length(trim(content)) > 0),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
