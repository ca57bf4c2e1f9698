//! [`ChatStore`] backed by the SQLite [`Database`].
//!
//! Queries and password hashing are synchronous, so every call runs on the
//! blocking pool and holds the database lock only there.

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_shared::types::{
    GroupId, GroupMember, GroupSummary, HistoryEntry, MessageId, UserId,
};
use parley_store::{Database, Group, NewMessage, StoreError, User};

use crate::ports::{ChatStore, StoreResult};

#[derive(Clone)]
pub struct SqlitePersistence {
    db: Arc<Mutex<Database>>,
}

impl SqlitePersistence {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| StoreError::Io(io::Error::other("database lock poisoned")))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
    }
}

/// Turn a missing row into `None`.
fn optional<T>(result: StoreResult<T>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ChatStore for SqlitePersistence {
    async fn verify_credentials(&self, username: &str, password: &str) -> StoreResult<Option<User>> {
        let (username, password) = (username.to_string(), password.to_string());
        self.with_db(move |db| db.verify_credentials(&username, &password))
            .await
    }

    async fn register_user(&self, username: &str, email: &str, password: &str) -> StoreResult<User> {
        let (username, email, password) =
            (username.to_string(), email.to_string(), password.to_string());
        self.with_db(move |db| db.create_user(&username, &email, &password))
            .await
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.with_db(move |db| optional(db.get_user(id))).await
    }

    async fn find_user_by_name(&self, username: &str) -> StoreResult<Option<User>> {
        let username = username.to_string();
        self.with_db(move |db| db.find_user_by_name(&username)).await
    }

    async fn search_users(&self, query: &str, limit: u32) -> StoreResult<Vec<User>> {
        let query = query.to_string();
        self.with_db(move |db| db.search_users(&query, limit)).await
    }

    async fn set_one_time_code(
        &self,
        user: UserId,
        code: Option<(&str, DateTime<Utc>)>,
    ) -> StoreResult<()> {
        let code = code.map(|(code, expires_at)| (code.to_string(), expires_at));
        self.with_db(move |db| match code {
            Some((code, expires_at)) => db.set_one_time_code(user, &code, expires_at),
            None => db.clear_one_time_code(user).map(|_| ()),
        })
        .await
    }

    async fn check_one_time_code(
        &self,
        user: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let code = code.to_string();
        self.with_db(move |db| db.check_one_time_code(user, &code, now))
            .await
    }

    async fn get_contacts(&self, owner: UserId) -> StoreResult<Vec<User>> {
        self.with_db(move |db| db.get_contacts(owner)).await
    }

    async fn add_contact(&self, owner: UserId, contact: UserId) -> StoreResult<bool> {
        self.with_db(move |db| db.add_contact(owner, contact)).await
    }

    async fn remove_contact(&self, owner: UserId, contact: UserId) -> StoreResult<bool> {
        self.with_db(move |db| db.remove_contact(owner, contact)).await
    }

    async fn save_message(&self, message: NewMessage) -> StoreResult<MessageId> {
        self.with_db(move |db| db.insert_message(&message)).await
    }

    async fn get_message(&self, id: MessageId) -> StoreResult<Option<HistoryEntry>> {
        self.with_db(move |db| optional(db.get_message(id))).await
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        delivered: bool,
        read: bool,
    ) -> StoreResult<()> {
        self.with_db(move |db| db.update_message_status(id, delivered, read))
            .await
    }

    async fn get_private_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> StoreResult<Vec<HistoryEntry>> {
        self.with_db(move |db| db.get_private_history(a, b, limit))
            .await
    }

    async fn get_group_history(&self, group: GroupId, limit: u32) -> StoreResult<Vec<HistoryEntry>> {
        self.with_db(move |db| db.get_group_history(group, limit)).await
    }

    async fn create_group(&self, name: &str, creator: UserId) -> StoreResult<Group> {
        let name = name.to_string();
        self.with_db(move |db| db.create_group(&name, creator)).await
    }

    async fn get_group(&self, id: GroupId) -> StoreResult<Group> {
        self.with_db(move |db| db.get_group(id)).await
    }

    async fn add_group_member(&self, group: GroupId, user: UserId, is_admin: bool) -> StoreResult<()> {
        self.with_db(move |db| db.add_group_member(group, user, is_admin))
            .await
    }

    async fn remove_group_member(&self, group: GroupId, user: UserId) -> StoreResult<bool> {
        self.with_db(move |db| db.remove_group_member(group, user))
            .await
    }

    async fn get_group_members(&self, group: GroupId) -> StoreResult<Vec<GroupMember>> {
        self.with_db(move |db| db.get_group_members(group)).await
    }

    async fn get_groups_by_user(&self, user: UserId) -> StoreResult<Vec<GroupSummary>> {
        self.with_db(move |db| db.get_groups_by_user(user)).await
    }
}
