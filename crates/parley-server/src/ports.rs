//! Boundaries between the connection core and its collaborators.
//!
//! The core never touches SQL, SMTP or the filesystem directly. It talks to
//! a [`ChatStore`] for persistence, a [`CodeMailer`] to hand out one-time
//! login codes and a [`FileStore`] for attachment bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_shared::types::{
    FileHandle, GroupId, GroupMember, GroupSummary, HistoryEntry, MessageId, UserId,
};
use parley_store::{Group, NewMessage, StoreError, User};

use crate::error::ServerError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence port.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn verify_credentials(&self, username: &str, password: &str) -> StoreResult<Option<User>>;

    async fn register_user(&self, username: &str, email: &str, password: &str) -> StoreResult<User>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_name(&self, username: &str) -> StoreResult<Option<User>>;

    async fn search_users(&self, query: &str, limit: u32) -> StoreResult<Vec<User>>;

    /// Record (`Some`) or clear (`None`) the live login code of `user`.
    async fn set_one_time_code(
        &self,
        user: UserId,
        code: Option<(&str, DateTime<Utc>)>,
    ) -> StoreResult<()>;

    async fn check_one_time_code(
        &self,
        user: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn get_contacts(&self, owner: UserId) -> StoreResult<Vec<User>>;

    /// Returns `false` if `contact` was already listed.
    async fn add_contact(&self, owner: UserId, contact: UserId) -> StoreResult<bool>;

    /// Returns `false` if `contact` was not listed.
    async fn remove_contact(&self, owner: UserId, contact: UserId) -> StoreResult<bool>;

    async fn save_message(&self, message: NewMessage) -> StoreResult<MessageId>;

    async fn get_message(&self, id: MessageId) -> StoreResult<Option<HistoryEntry>>;

    async fn update_message_status(
        &self,
        id: MessageId,
        delivered: bool,
        read: bool,
    ) -> StoreResult<()>;

    async fn get_private_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> StoreResult<Vec<HistoryEntry>>;

    async fn get_group_history(&self, group: GroupId, limit: u32) -> StoreResult<Vec<HistoryEntry>>;

    async fn create_group(&self, name: &str, creator: UserId) -> StoreResult<Group>;

    async fn get_group(&self, id: GroupId) -> StoreResult<Group>;

    /// Fails with [`StoreError::GroupFull`] once the group holds
    /// `MAX_GROUP_MEMBERS`, checked atomically with the insert.
    async fn add_group_member(&self, group: GroupId, user: UserId, is_admin: bool) -> StoreResult<()>;

    /// Returns `false` if `user` was not a member.
    async fn remove_group_member(&self, group: GroupId, user: UserId) -> StoreResult<bool>;

    async fn get_group_members(&self, group: GroupId) -> StoreResult<Vec<GroupMember>>;

    async fn get_groups_by_user(&self, user: UserId) -> StoreResult<Vec<GroupSummary>>;
}

/// Delivery port for one-time login codes.
#[async_trait]
pub trait CodeMailer: Send + Sync {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), ServerError>;
}

/// Attachment storage port.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, data: &[u8], original_name: &str) -> Result<FileHandle, ServerError>;

    async fn load(&self, handle: FileHandle) -> Result<Vec<u8>, ServerError>;
}
