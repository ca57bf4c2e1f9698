//! Domain model structs persisted in the server database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::types::{ContentKind, FileHandle, GroupId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Unique, case-insensitive login name.
    pub username: String,
    /// Address one-time login codes are delivered to.
    pub email: String,
    /// Argon2id PHC string. Never sent over the wire.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// The creating user, who starts out as the only admin.
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message about to be written.
///
/// Exactly one of `content` (text) or `file_handle` (attachment) is set,
/// matching `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    /// User id for direct messages, group id for group messages.
    pub receiver_id: i64,
    pub is_group: bool,
    pub kind: ContentKind,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub file_handle: Option<FileHandle>,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    pub fn text(sender_id: UserId, receiver_id: i64, is_group: bool, text: &str) -> Self {
        Self {
            sender_id,
            receiver_id,
            is_group,
            kind: ContentKind::Text,
            content: Some(text.to_string()),
            file_name: None,
            file_handle: None,
            timestamp: Utc::now(),
        }
    }

    pub fn file(
        sender_id: UserId,
        receiver_id: i64,
        is_group: bool,
        file_name: &str,
        handle: FileHandle,
    ) -> Self {
        Self {
            sender_id,
            receiver_id,
            is_group,
            kind: ContentKind::File,
            content: None,
            file_name: Some(file_name.to_string()),
            file_handle: Some(handle),
            timestamp: Utc::now(),
        }
    }
}

pub(crate) fn kind_to_sql(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Text => "text",
        ContentKind::File => "file",
    }
}

pub(crate) fn kind_from_sql(s: &str) -> ContentKind {
    match s {
        "file" => ContentKind::File,
        _ => ContentKind::Text,
    }
}

/// Parse an RFC-3339 column into a UTC timestamp.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
