//! Fixtures shared by the unit tests: an in-memory server context, a mailer
//! that remembers every code, a store that can be slowed down or broken, and
//! a client speaking the wire protocol over an in-process duplex stream.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parley_shared::codec::EnvelopeCodec;
use parley_shared::protocol::{Envelope, Kind};
use parley_shared::types::{
    GroupId, GroupMember, GroupSummary, HistoryEntry, MessageId, UserId,
};
use parley_store::{Database, Group, NewMessage, StoreError, User};

use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::files::DiskFileStore;
use crate::persistence::SqlitePersistence;
use crate::ports::{ChatStore, CodeMailer, StoreResult};
use crate::registry::{Identity, SessionHandle};

pub const PASSWORD: &str = "correct horse";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn last_code(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl CodeMailer for RecordingMailer {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), ServerError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}

/// SQLite store that can be told to fail every call or only message saves,
/// or to stall on user lookups the way a slow backend would.
pub struct FlakyStore {
    inner: SqlitePersistence,
    broken: AtomicBool,
    saves_broken: AtomicBool,
    lookup_delay: Duration,
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::with_lookup_delay(Duration::ZERO)
    }
}

impl FlakyStore {
    pub fn with_lookup_delay(lookup_delay: Duration) -> Self {
        Self {
            inner: SqlitePersistence::new(Database::open_in_memory().unwrap()),
            broken: AtomicBool::new(false),
            saves_broken: AtomicBool::new(false),
            lookup_delay,
        }
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn set_saves_broken(&self, broken: bool) {
        self.saves_broken.store(broken, Ordering::SeqCst);
    }

    fn gate(&self) -> StoreResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("database unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for FlakyStore {
    async fn verify_credentials(&self, username: &str, password: &str) -> StoreResult<Option<User>> {
        self.gate()?;
        self.inner.verify_credentials(username, password).await
    }

    async fn register_user(&self, username: &str, email: &str, password: &str) -> StoreResult<User> {
        self.gate()?;
        self.inner.register_user(username, email, password).await
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.gate()?;
        self.inner.get_user(id).await
    }

    async fn find_user_by_name(&self, username: &str) -> StoreResult<Option<User>> {
        self.gate()?;
        tokio::time::sleep(self.lookup_delay).await;
        self.inner.find_user_by_name(username).await
    }

    async fn search_users(&self, query: &str, limit: u32) -> StoreResult<Vec<User>> {
        self.gate()?;
        self.inner.search_users(query, limit).await
    }

    async fn set_one_time_code(
        &self,
        user: UserId,
        code: Option<(&str, DateTime<Utc>)>,
    ) -> StoreResult<()> {
        self.gate()?;
        self.inner.set_one_time_code(user, code).await
    }

    async fn check_one_time_code(
        &self,
        user: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.gate()?;
        self.inner.check_one_time_code(user, code, now).await
    }

    async fn get_contacts(&self, owner: UserId) -> StoreResult<Vec<User>> {
        self.gate()?;
        self.inner.get_contacts(owner).await
    }

    async fn add_contact(&self, owner: UserId, contact: UserId) -> StoreResult<bool> {
        self.gate()?;
        self.inner.add_contact(owner, contact).await
    }

    async fn remove_contact(&self, owner: UserId, contact: UserId) -> StoreResult<bool> {
        self.gate()?;
        self.inner.remove_contact(owner, contact).await
    }

    async fn save_message(&self, message: NewMessage) -> StoreResult<MessageId> {
        self.gate()?;
        if self.saves_broken.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("disk full")));
        }
        self.inner.save_message(message).await
    }

    async fn get_message(&self, id: MessageId) -> StoreResult<Option<HistoryEntry>> {
        self.gate()?;
        self.inner.get_message(id).await
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        delivered: bool,
        read: bool,
    ) -> StoreResult<()> {
        self.gate()?;
        self.inner.update_message_status(id, delivered, read).await
    }

    async fn get_private_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> StoreResult<Vec<HistoryEntry>> {
        self.gate()?;
        self.inner.get_private_history(a, b, limit).await
    }

    async fn get_group_history(&self, group: GroupId, limit: u32) -> StoreResult<Vec<HistoryEntry>> {
        self.gate()?;
        self.inner.get_group_history(group, limit).await
    }

    async fn create_group(&self, name: &str, creator: UserId) -> StoreResult<Group> {
        self.gate()?;
        self.inner.create_group(name, creator).await
    }

    async fn get_group(&self, id: GroupId) -> StoreResult<Group> {
        self.gate()?;
        self.inner.get_group(id).await
    }

    async fn add_group_member(&self, group: GroupId, user: UserId, is_admin: bool) -> StoreResult<()> {
        self.gate()?;
        self.inner.add_group_member(group, user, is_admin).await
    }

    async fn remove_group_member(&self, group: GroupId, user: UserId) -> StoreResult<bool> {
        self.gate()?;
        self.inner.remove_group_member(group, user).await
    }

    async fn get_group_members(&self, group: GroupId) -> StoreResult<Vec<GroupMember>> {
        self.gate()?;
        self.inner.get_group_members(group).await
    }

    async fn get_groups_by_user(&self, user: UserId) -> StoreResult<Vec<GroupSummary>> {
        self.gate()?;
        self.inner.get_groups_by_user(user).await
    }
}

pub struct Harness {
    pub ctx: Arc<ServerContext>,
    pub mailer: Arc<RecordingMailer>,
    _files: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::default()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let store = SqlitePersistence::new(Database::open_in_memory().unwrap());
        Self::with_store(config, Arc::new(store)).await
    }

    pub async fn with_store(config: ServerConfig, store: Arc<dyn ChatStore>) -> Self {
        let dir = TempDir::new().unwrap();
        let files = DiskFileStore::new(dir.path().join("files"), config.max_file_size)
            .await
            .unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let ctx = ServerContext::new(config, store, mailer.clone(), Arc::new(files));
        Self {
            ctx: Arc::new(ctx),
            mailer,
            _files: dir,
        }
    }

    pub async fn add_user(&self, name: &str) -> User {
        self.ctx
            .store
            .register_user(name, &format!("{name}@example.com"), PASSWORD)
            .await
            .unwrap()
    }

    /// Put a fake session for `user` in the registry and return what it receives.
    pub async fn attach(&self, user: &User) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(16);
        let handle = SessionHandle::new(
            Identity {
                id: user.id,
                username: user.username.clone(),
            },
            Uuid::new_v4(),
            tx,
            CancellationToken::new(),
        );
        self.ctx.registry.register(handle).await;
        rx
    }

    pub fn connect(&self) -> TestClient {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_connection(
            server,
            None,
            self.ctx.clone(),
            shutdown.clone(),
        ));
        TestClient {
            framed: Framed::new(client, EnvelopeCodec::new()),
            shutdown,
            task,
        }
    }

    /// Connect and complete the password and code steps as `name`.
    pub async fn login(&self, name: &str) -> TestClient {
        let mut client = self.connect();
        client
            .send(
                Envelope::new(Kind::Login)
                    .with_sender_name(name)
                    .with_content(PASSWORD),
            )
            .await;
        assert_eq!(client.recv().await.kind, Kind::Require2fa);

        let code = self
            .mailer
            .last_code(&format!("{name}@example.com"))
            .unwrap();
        client
            .send(Envelope::new(Kind::Verify2fa).with_content(code))
            .await;
        assert_eq!(client.recv().await.kind, Kind::LoginOk);
        client
    }
}

pub struct TestClient {
    framed: Framed<DuplexStream, EnvelopeCodec>,
    pub shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl TestClient {
    pub async fn send(&mut self, envelope: Envelope) {
        self.framed.send(envelope).await.unwrap();
    }

    pub async fn recv(&mut self) -> Envelope {
        tokio::time::timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap()
    }

    pub async fn expect_silence(&mut self) {
        let next = tokio::time::timeout(SILENCE, self.framed.next()).await;
        assert!(next.is_err(), "unexpected frame: {:?}", next);
    }

    pub async fn expect_closed(&mut self) {
        let next = tokio::time::timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for close");
        assert!(next.is_none(), "expected end of stream, got {:?}", next);
    }

    /// Wait for the server side of the connection to finish.
    pub async fn join(self) {
        tokio::time::timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("connection task did not finish")
            .unwrap();
    }

    /// Drop the client end and wait for the server to clean up.
    pub async fn disconnect(self) {
        let TestClient { framed, task, .. } = self;
        drop(framed);
        tokio::time::timeout(RECV_TIMEOUT, task)
            .await
            .expect("connection task did not finish")
            .unwrap();
    }
}
