use rusqlite::params;

use parley_shared::types::{FileHandle, GroupId, HistoryEntry, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{kind_from_sql, kind_to_sql, parse_ts, NewMessage};

const HISTORY_SELECT: &str =
    "SELECT m.id, m.sender_id, u.username, m.receiver_id, m.is_group, m.kind, m.content,
            m.file_name, m.file_handle, m.delivered, m.read, m.timestamp
     FROM messages m
     JOIN users u ON u.id = m.sender_id";

impl Database {
    pub fn insert_message(&self, message: &NewMessage) -> Result<MessageId> {
        self.conn().execute(
            "INSERT INTO messages
                (sender_id, receiver_id, is_group, kind, content, file_name, file_handle, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.sender_id.0,
                message.receiver_id,
                message.is_group,
                kind_to_sql(message.kind),
                message.content,
                message.file_name,
                message.file_handle.map(|h| h.to_string()),
                message.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(MessageId(self.conn().last_insert_rowid()))
    }

    /// Raise the delivered/read flags of a message. Flags are never cleared.
    pub fn update_message_status(&self, id: MessageId, delivered: bool, read: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET delivered = (delivered OR ?2 OR ?3),
                 read      = (read OR ?3)
             WHERE id = ?1",
            params![id.0, delivered, read],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Direct conversation between `a` and `b`, oldest first, at most `limit`
    /// of the most recent messages.
    pub fn get_private_history(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn().prepare(&format!(
            "{HISTORY_SELECT}
             WHERE m.is_group = 0
               AND ((m.sender_id = ?1 AND m.receiver_id = ?2)
                 OR (m.sender_id = ?2 AND m.receiver_id = ?1))
             ORDER BY m.id DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![a.0, b.0, limit], row_to_entry)?;
        collect_chronological(rows)
    }

    /// Messages posted to `group`, oldest first, at most `limit` of the most
    /// recent ones.
    pub fn get_group_history(&self, group: GroupId, limit: u32) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn().prepare(&format!(
            "{HISTORY_SELECT}
             WHERE m.is_group = 1 AND m.receiver_id = ?1
             ORDER BY m.id DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![group.0, limit], row_to_entry)?;
        collect_chronological(rows)
    }

    pub fn get_message(&self, id: MessageId) -> Result<HistoryEntry> {
        self.conn()
            .query_row(
                &format!("{HISTORY_SELECT} WHERE m.id = ?1"),
                params![id.0],
                row_to_entry,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

fn collect_chronological(
    rows: impl Iterator<Item = rusqlite::Result<HistoryEntry>>,
) -> Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    entries.reverse();
    Ok(entries)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let kind_raw: String = row.get(5)?;
    let handle_raw: Option<String> = row.get(8)?;
    let ts_raw: String = row.get(11)?;

    let file_handle = handle_raw
        .map(|s| FileHandle::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(HistoryEntry {
        id: MessageId(row.get(0)?),
        sender_id: UserId(row.get(1)?),
        sender_name: row.get(2)?,
        receiver_id: row.get(3)?,
        is_group: row.get(4)?,
        kind: kind_from_sql(&kind_raw),
        content: row.get(6)?,
        file_name: row.get(7)?,
        file_handle,
        delivered: row.get(9)?,
        read: row.get(10)?,
        timestamp: parse_ts(11, &ts_raw)?,
    })
}
