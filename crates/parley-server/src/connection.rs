//! One task per accepted connection.
//!
//! The connection reads frames in a loop and walks the login state machine
//! (unauthenticated, awaiting code, authenticated). Every write to the peer,
//! whether a reply or a frame forwarded by another connection, goes through a
//! bounded queue drained by a single writer task, so frames never interleave.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_shared::codec::EnvelopeCodec;
use parley_shared::constants::FRAME_OVERHEAD;
use parley_shared::protocol::{Envelope, Kind};
use parley_store::StoreError;

use crate::auth::{self, CodeCheck, PendingAuth, Registration};
use crate::context::ServerContext;
use crate::registry::{Identity, SessionHandle};
use crate::requests;
use crate::router::Router;

/// How long the writer may keep flushing queued frames after the read loop ends.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

enum State {
    Unauthenticated,
    AwaitingCode(PendingAuth),
    Authenticated(Identity),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

struct Connection {
    ctx: Arc<ServerContext>,
    id: Uuid,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    state: State,
}

/// Drive one client connection until the peer disconnects, sends LOGOUT, or
/// `shutdown` is cancelled.
pub async fn serve_connection<S>(
    stream: S,
    peer: Option<SocketAddr>,
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = Uuid::new_v4();
    let max_frame = ctx.config.max_file_size.saturating_add(FRAME_OVERHEAD);
    let (reader, writer) = tokio::io::split(stream);
    let mut frames = FramedRead::new(reader, EnvelopeCodec::with_max_frame(max_frame));
    let sink = FramedWrite::new(writer, EnvelopeCodec::with_max_frame(max_frame));

    let (outbound, queue) = mpsc::channel(ctx.config.outbound_queue);
    let mut writer_task = tokio::spawn(write_loop(sink, queue, id));

    debug!(conn = %id, peer = ?peer, "Connection opened");

    let mut conn = Connection {
        ctx,
        id,
        peer,
        outbound,
        shutdown: shutdown.clone(),
        state: State::Unauthenticated,
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(conn = %id, "Connection cancelled");
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(envelope)) => {
                    if conn.handle(envelope).await == Flow::Close {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(conn = %id, error = %e, "Dropping connection on bad frame");
                    break;
                }
                None => {
                    debug!(conn = %id, "Peer closed connection");
                    break;
                }
            }
        }
    }

    conn.cleanup().await;
    drop(conn);

    // The writer ends once every sender is gone; give it a moment to flush.
    if tokio::time::timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
        debug!(conn = %id, "Writer did not drain in time");
        writer_task.abort();
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, EnvelopeCodec>,
    mut queue: mpsc::Receiver<Envelope>,
    conn: Uuid,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = queue.recv().await {
        if let Err(e) = sink.send(envelope).await {
            debug!(conn = %conn, error = %e, "Write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

impl Connection {
    async fn handle(&mut self, envelope: Envelope) -> Flow {
        if envelope.kind == Kind::Logout {
            debug!(conn = %self.id, "Logout requested");
            return Flow::Close;
        }

        if let State::Authenticated(identity) = &self.state {
            let identity = identity.clone();
            return self.handle_authenticated(&identity, envelope).await;
        }

        match envelope.kind {
            Kind::Login => self.login(envelope).await,
            Kind::Register => self.register(envelope).await,
            Kind::Verify2fa => self.verify(envelope).await,
            other => {
                debug!(conn = %self.id, kind = ?other, "Dropping frame before login");
            }
        }
        Flow::Continue
    }

    async fn handle_authenticated(&mut self, me: &Identity, envelope: Envelope) -> Flow {
        let kind = envelope.kind;
        let reply = if kind.is_pre_auth() {
            debug!(conn = %self.id, user = %me.id, kind = ?kind, "Already logged in");
            None
        } else if kind.is_chat() || kind.is_receipt() {
            Router::new(&self.ctx).deliver(me, envelope).await
        } else {
            requests::handle(&self.ctx, me, envelope).await
        };

        if let Some(reply) = reply {
            self.reply(reply).await;
        }
        Flow::Continue
    }

    async fn reply(&self, envelope: Envelope) {
        if self.outbound.send(envelope).await.is_err() {
            debug!(conn = %self.id, "Reply dropped, writer gone");
        }
    }

    async fn throttled(&self) -> bool {
        !self.ctx.throttle.allow(self.peer.map(|p| p.ip())).await
    }

    async fn login(&mut self, envelope: Envelope) {
        if self.throttled().await {
            self.reply(Envelope::failure(Kind::LoginFail, "too many attempts, try again later"))
                .await;
            return;
        }

        let username = envelope.sender_name.as_deref().map(str::trim).unwrap_or("");
        let password = envelope.content.as_deref().unwrap_or("");
        if username.is_empty() || password.is_empty() {
            self.reply(Envelope::failure(Kind::LoginFail, "username and password required"))
                .await;
            return;
        }

        // A new attempt always replaces whatever login was pending.
        self.state = State::Unauthenticated;

        let user = match self.ctx.store.verify_credentials(username, password).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                info!(conn = %self.id, username, "Login rejected");
                self.reply(Envelope::failure(Kind::LoginFail, "invalid username or password"))
                    .await;
                return;
            }
            Err(e) => {
                error!(conn = %self.id, error = %e, "Credential check failed");
                self.reply(Envelope::failure(Kind::LoginFail, "login unavailable, try again later"))
                    .await;
                return;
            }
        };

        self.start_code_challenge(&user, Kind::LoginFail).await;
    }

    async fn register(&mut self, envelope: Envelope) {
        if self.throttled().await {
            self.reply(Envelope::failure(Kind::RegisterFail, "too many attempts, try again later"))
                .await;
            return;
        }

        let registration = match Registration::parse(envelope.content.as_deref().unwrap_or("")) {
            Ok(registration) => registration,
            Err(reason) => {
                self.reply(Envelope::failure(Kind::RegisterFail, reason)).await;
                return;
            }
        };

        self.state = State::Unauthenticated;

        let user = match self
            .ctx
            .store
            .register_user(&registration.username, &registration.email, &registration.password)
            .await
        {
            Ok(user) => user,
            Err(StoreError::Duplicate(field)) => {
                info!(conn = %self.id, field, "Registration rejected");
                self.reply(Envelope::failure(Kind::RegisterFail, format!("{field} already taken")))
                    .await;
                return;
            }
            Err(e) => {
                error!(conn = %self.id, error = %e, "Registration failed");
                self.reply(Envelope::failure(
                    Kind::RegisterFail,
                    "registration unavailable, try again later",
                ))
                .await;
                return;
            }
        };
        info!(conn = %self.id, user = %user.id, username = %user.username, "Account registered");

        self.start_code_challenge(&user, Kind::RegisterFail).await;
    }

    async fn start_code_challenge(&mut self, user: &parley_store::User, fail: Kind) {
        match auth::issue_code(&self.ctx, user).await {
            Ok(pending) => {
                self.state = State::AwaitingCode(pending);
                self.reply(Envelope::new(Kind::Require2fa).with_sender_name(&user.username))
                    .await;
            }
            Err(e) => {
                error!(conn = %self.id, user = %user.id, error = %e, "Could not issue login code");
                self.reply(Envelope::failure(fail, "login code could not be delivered"))
                    .await;
            }
        }
    }

    async fn verify(&mut self, envelope: Envelope) {
        if self.throttled().await {
            self.reply(Envelope::failure(Kind::LoginFail, "too many attempts, try again later"))
                .await;
            return;
        }

        let State::AwaitingCode(pending) = &mut self.state else {
            self.reply(Envelope::failure(Kind::LoginFail, "no login in progress"))
                .await;
            return;
        };

        let submitted = envelope.content.as_deref().unwrap_or("").trim();
        let reason = match pending.check(submitted, self.ctx.config.max_code_attempts) {
            CodeCheck::Accepted => {
                let identity = pending.identity.clone();
                match auth::confirm_code(&self.ctx, &identity, submitted).await {
                    Ok(true) => {
                        self.complete_login(identity).await;
                        return;
                    }
                    Ok(false) => {
                        self.state = State::Unauthenticated;
                        "code replaced by a newer login, log in again".to_string()
                    }
                    Err(e) => {
                        error!(conn = %self.id, user = %identity.id, error = %e, "Code check failed");
                        "login unavailable, try again later".to_string()
                    }
                }
            }
            CodeCheck::Rejected { remaining } => {
                format!("incorrect code, {remaining} attempts left")
            }
            CodeCheck::Expired => "code expired, log in again".to_string(),
            CodeCheck::Exhausted => {
                self.state = State::Unauthenticated;
                "too many incorrect codes, log in again".to_string()
            }
        };

        debug!(conn = %self.id, reason = %reason, "Code rejected");
        self.reply(Envelope::failure(Kind::LoginFail, reason)).await;
    }

    async fn complete_login(&mut self, identity: Identity) {
        auth::consume_code(&self.ctx, &identity).await;

        let session = SessionHandle::new(
            identity.clone(),
            self.id,
            self.outbound.clone(),
            self.shutdown.clone(),
        );
        // Register before replying so the client is reachable as soon as it
        // sees LOGIN_OK.
        if let Some(evicted) = self.ctx.registry.register(session).await {
            evicted.send(Envelope::error_notice("signed in from another location"));
            evicted.close();
        }
        self.state = State::Authenticated(identity.clone());

        info!(conn = %self.id, user = %identity.id, username = %identity.username, "User logged in");
        self.reply(Envelope::new(Kind::LoginOk).with_sender(identity.id, &identity.username))
            .await;
    }

    async fn cleanup(&mut self) {
        if let State::Authenticated(identity) = &self.state {
            self.ctx.registry.release(identity.id, self.id).await;
            info!(conn = %self.id, user = %identity.id, "User disconnected");
        }
        self.state = State::Unauthenticated;
    }
}
