//! Accounts, credential checks and one-time login codes.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::types::UserId;

use crate::database::Database;
use crate::error::{map_unique, Result, StoreError};
use crate::models::{parse_ts, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new account, hashing `password` with Argon2id.
    ///
    /// Fails with [`StoreError::Duplicate`] naming the clashing field when the
    /// username or email is already taken.
    pub fn create_user(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if self.find_user_by_name(username)?.is_some() {
            return Err(StoreError::Duplicate("username"));
        }
        let email_taken: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![email],
            |row| row.get(0),
        )?;
        if email_taken {
            return Err(StoreError::Duplicate("email"));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .hasher()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?
            .to_string();
        let created_at = Utc::now();

        self.conn()
            .execute(
                "INSERT INTO users (username, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![username, email, password_hash, created_at.to_rfc3339()],
            )
            .map_err(|e| map_unique(e, "account"))?;

        let id = UserId(self.conn().last_insert_rowid());
        tracing::debug!(user = %id, username, "created user");

        Ok(User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            created_at,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Return the account if `password` matches its stored hash.
    pub fn verify_credentials(&self, username: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_user_by_name(username)? else {
            return Ok(None);
        };

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        let ok = self
            .hasher()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();

        Ok(ok.then_some(user))
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.0],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Case-insensitive lookup by username.
    pub fn find_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Usernames containing `query`, ordered alphabetically.
    pub fn search_users(&self, query: &str, limit: u32) -> Result<Vec<User>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE username LIKE ?1 ESCAPE '\\'
             ORDER BY username ASC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![pattern, limit], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // One-time codes
    // ------------------------------------------------------------------

    /// Record the live login code for `user`, replacing any previous one.
    pub fn set_one_time_code(
        &self,
        user: UserId,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO one_time_codes (user_id, code, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET code = excluded.code,
                                                expires_at = excluded.expires_at",
            params![user.0, code, expires_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Drop the live login code for `user`. Returns `true` if one existed.
    pub fn clear_one_time_code(&self, user: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM one_time_codes WHERE user_id = ?1", params![user.0])?;
        Ok(affected > 0)
    }

    /// `true` if `code` is the live code for `user` and has not expired at `now`.
    pub fn check_one_time_code(&self, user: UserId, code: &str, now: DateTime<Utc>) -> Result<bool> {
        let stored: Option<(String, String)> = self
            .conn()
            .query_row(
                "SELECT code, expires_at FROM one_time_codes WHERE user_id = ?1",
                params![user.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((stored_code, expires_raw)) = stored else {
            return Ok(false);
        };
        let expires_at = parse_ts(1, &expires_raw)?;

        Ok(stored_code == code && now < expires_at)
    }
}

/// Map a `rusqlite::Row` selected with [`USER_COLUMNS`] to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created_raw: String = row.get(4)?;
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: parse_ts(4, &created_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_register_and_verify() {
        let db = db();
        let alice = db.create_user("alice", "alice@example.com", "hunter22").unwrap();
        assert_ne!(alice.password_hash, "hunter22");

        let verified = db.verify_credentials("alice", "hunter22").unwrap().unwrap();
        assert_eq!(verified.id, alice.id);
        assert!(db.verify_credentials("alice", "wrong").unwrap().is_none());
        assert!(db.verify_credentials("nobody", "hunter22").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_and_email() {
        let db = db();
        db.create_user("alice", "alice@example.com", "hunter22").unwrap();

        assert!(matches!(
            db.create_user("ALICE", "other@example.com", "pw1234"),
            Err(StoreError::Duplicate("username"))
        ));
        assert!(matches!(
            db.create_user("alice2", "alice@example.com", "pw1234"),
            Err(StoreError::Duplicate("email"))
        ));
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let db = db();
        db.create_user("alice", "a@example.com", "pw1234").unwrap();
        db.create_user("malik", "m@example.com", "pw1234").unwrap();
        db.create_user("bob_1", "b@example.com", "pw1234").unwrap();

        let names: Vec<String> = db
            .search_users("li", 10)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alice", "malik"]);

        let underscored = db.search_users("_", 10).unwrap();
        assert_eq!(underscored.len(), 1);
        assert_eq!(underscored[0].username, "bob_1");
    }

    #[test]
    fn test_one_time_code_expiry() {
        let db = db();
        let alice = db.create_user("alice", "a@example.com", "pw1234").unwrap();
        let now = Utc::now();

        db.set_one_time_code(alice.id, "123456", now + Duration::minutes(5))
            .unwrap();
        assert!(db.check_one_time_code(alice.id, "123456", now).unwrap());
        assert!(!db.check_one_time_code(alice.id, "654321", now).unwrap());
        assert!(!db
            .check_one_time_code(alice.id, "123456", now + Duration::minutes(6))
            .unwrap());

        assert!(db.clear_one_time_code(alice.id).unwrap());
        assert!(!db.check_one_time_code(alice.id, "123456", now).unwrap());
    }
}
