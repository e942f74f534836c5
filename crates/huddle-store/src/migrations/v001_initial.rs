//! v001 -- Initial schema creation.
//!
//! Creates `users`, `groups`, `group_members`, `direct_messages`,
//! `group_messages` and `group_message_reads`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (display profile only; identities come from the session provider)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID
    display_name TEXT,
    avatar       TEXT,                        -- URL
    created_at   TEXT NOT NULL,               -- RFC-3339
    updated_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    name        TEXT NOT NULL,
    description TEXT,
    avatar      TEXT,                         -- URL
    admin_id    TEXT NOT NULL,                -- never transferred
    is_active   INTEGER NOT NULL DEFAULT 1,   -- 0 = soft deleted
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Group members (one row per user; position keeps join order)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_members (
    group_id  TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL CHECK (role IN ('admin', 'member')),
    position  INTEGER NOT NULL,
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Direct messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS direct_messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    text        TEXT,
    image       TEXT,                         -- URL
    is_read     INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1, only ever 0 -> 1
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_direct_messages_pair
    ON direct_messages(sender_id, receiver_id, created_at);

CREATE INDEX IF NOT EXISTS idx_direct_messages_unread
    ON direct_messages(receiver_id, is_read);

-- ----------------------------------------------------------------
-- Group messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    group_id   TEXT NOT NULL,
    sender_id  TEXT NOT NULL,
    text       TEXT,
    image      TEXT,                          -- URL
    created_at TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE INDEX IF NOT EXISTS idx_group_messages_group_ts
    ON group_messages(group_id, created_at);

-- ----------------------------------------------------------------
-- Group read markers (the readBy set; append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_message_reads (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES group_messages(id)
);

CREATE INDEX IF NOT EXISTS idx_group_message_reads_user
    ON group_message_reads(user_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
