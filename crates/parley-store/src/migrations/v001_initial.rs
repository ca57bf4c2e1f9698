//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `one_time_codes`, `contacts`, `chat_groups`,
//! `group_members` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,              -- Argon2id PHC string
    created_at    TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- One-time login codes (at most one live code per user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS one_time_codes (
    user_id    INTEGER PRIMARY KEY NOT NULL,  -- FK -> users(id)
    code       TEXT NOT NULL,
    expires_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Contacts (directed: owner lists contact)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    owner_id   INTEGER NOT NULL,
    contact_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (owner_id, contact_id),
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (contact_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_groups (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    created_by INTEGER NOT NULL,              -- FK -> users(id)
    created_at TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  INTEGER NOT NULL,
    user_id   INTEGER NOT NULL,
    is_admin  INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Messages (receiver_id is a user id or a group id, per is_group)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id   INTEGER NOT NULL,             -- FK -> users(id)
    receiver_id INTEGER NOT NULL,
    is_group    INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    kind        TEXT NOT NULL,                -- 'text' | 'file'
    content     TEXT,
    file_name   TEXT,
    file_handle TEXT,                         -- UUID of the stored attachment
    timestamp   TEXT NOT NULL,

    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(is_group, receiver_id, sender_id, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
