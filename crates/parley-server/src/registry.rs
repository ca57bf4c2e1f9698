use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::protocol::Envelope;
use parley_shared::types::UserId;

/// The account an authenticated connection acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
}

/// Registry entry for one authenticated connection.
///
/// Cloning is cheap; every clone feeds the same writer task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub identity: Identity,
    pub connection_id: Uuid,
    outbound: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        identity: Identity,
        connection_id: Uuid,
        outbound: mpsc::Sender<Envelope>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            identity,
            connection_id,
            outbound,
            shutdown,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.identity.id
    }

    /// Queue a frame for this connection without waiting.
    ///
    /// Returns `false` when the frame was dropped: the peer is not draining
    /// its queue fast enough, or the connection is already gone.
    pub fn send(&self, envelope: Envelope) -> bool {
        match self.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(env)) => {
                warn!(
                    user = %self.identity.id,
                    conn = %self.connection_id,
                    kind = ?env.kind,
                    "Dropping frame for slow connection"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the owning connection task to shut down.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbound.is_closed()
    }
}

/// Online users, keyed by user id. At most one session per user.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<UserId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle`, replacing any session the same user already had.
    ///
    /// The replaced handle is returned so the caller can close it. The
    /// registry never closes it itself.
    pub async fn register(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let user = handle.user_id();
        let conn = handle.connection_id;
        let previous = self.sessions.write().await.insert(user, handle);

        let previous = previous.filter(|old| old.connection_id != conn);
        match &previous {
            Some(old) => info!(
                user = %user,
                conn = %conn,
                evicted = %old.connection_id,
                "Session replaced by newer login"
            ),
            None => debug!(user = %user, conn = %conn, "Session registered"),
        }
        previous
    }

    pub async fn unregister(&self, user: UserId) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(&user);
        if removed.is_some() {
            debug!(user = %user, "Session unregistered");
        }
        removed
    }

    /// Remove the entry for `user` only if it still belongs to `connection_id`.
    ///
    /// Connection cleanup goes through here so an evicted connection can
    /// never remove the session that replaced it.
    pub async fn release(&self, user: UserId, connection_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&user) {
            Some(handle) if handle.connection_id == connection_id => {
                sessions.remove(&user);
                debug!(user = %user, conn = %connection_id, "Session released");
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user: UserId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&user).cloned()
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.sessions.read().await.contains_key(&user)
    }

    /// Number of distinct users online.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Everyone online, ordered by username.
    pub async fn online_users(&self) -> Vec<Identity> {
        let mut users: Vec<Identity> = self
            .sessions
            .read()
            .await
            .values()
            .map(|h| h.identity.clone())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Queue `envelope` to every session except `sender`'s that satisfies
    /// `predicate`. Returns how many sessions accepted it.
    pub async fn broadcast_except<P>(&self, sender: UserId, envelope: &Envelope, predicate: P) -> usize
    where
        P: Fn(&SessionHandle) -> bool,
    {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|h| h.user_id() != sender && predicate(h))
            .filter(|h| h.send(envelope.clone()))
            .count()
    }
}
