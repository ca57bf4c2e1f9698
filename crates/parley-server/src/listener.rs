//! TCP acceptor for chat connections.
//!
//! [`ChatServer::run`] accepts until [`ServerHandle::stop`] is called or the
//! socket fails, spawning one [`serve_connection`] task per peer. Stopping
//! cancels every connection and waits for them up to the configured grace
//! period.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::connection::serve_connection;
use crate::context::ServerContext;

pub struct ChatServer {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Cloneable control surface for a running [`ChatServer`].
#[derive(Clone)]
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
}

impl ServerHandle {
    /// Ask the server to stop accepting and close all connections.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Authenticated users currently online (not raw sockets).
    pub async fn connected_count(&self) -> usize {
        self.ctx.registry.count().await
    }

    /// Usernames of everyone online, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        self.ctx
            .registry
            .online_users()
            .await
            .into_iter()
            .map(|identity| identity.username)
            .collect()
    }
}

impl ChatServer {
    pub async fn bind(addr: SocketAddr, ctx: Arc<ServerContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            ctx,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ctx: self.ctx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Accept connections until stopped. Returns an error only if the
    /// listening socket itself failed.
    pub async fn run(self) -> io::Result<()> {
        let ChatServer {
            listener,
            ctx,
            cancel,
            tasks,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Chat listener started");
        }

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        debug!(peer = %peer, "Accepted connection");
                        tasks.spawn(serve_connection(
                            stream,
                            Some(peer),
                            ctx.clone(),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "Accept failed, continuing");
                    }
                    Err(e) => {
                        error!(error = %e, "Chat listener failed");
                        break Err(e);
                    }
                }
            }
        };

        // Release the port before waiting on connections.
        drop(listener);
        cancel.cancel();
        tasks.close();

        let grace = ctx.config.shutdown_grace;
        if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
            warn!(remaining = tasks.len(), "Connections still open after grace period");
        }
        info!("Chat listener stopped");
        result
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
