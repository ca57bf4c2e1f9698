//! Per-user contact lists.

use chrono::Utc;
use rusqlite::params;

use parley_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::User;
use crate::users::row_to_user;

impl Database {
    /// Contacts of `owner`, ordered by username.
    pub fn get_contacts(&self, owner: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.username, u.email, u.password_hash, u.created_at
             FROM contacts c
             JOIN users u ON u.id = c.contact_id
             WHERE c.owner_id = ?1
             ORDER BY u.username ASC",
        )?;

        let rows = stmt.query_map(params![owner.0], row_to_user)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    /// Add `contact` to `owner`'s list. Returns `false` if already present.
    pub fn add_contact(&self, owner: UserId, contact: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO contacts (owner_id, contact_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![owner.0, contact.0, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Remove `contact` from `owner`'s list. Returns `true` if a row was deleted.
    pub fn remove_contact(&self, owner: UserId, contact: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM contacts WHERE owner_id = ?1 AND contact_id = ?2",
            params![owner.0, contact.0],
        )?;
        Ok(affected > 0)
    }
}
