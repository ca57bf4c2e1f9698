//! # parley-server
//!
//! Chat relay server for Parley.
//!
//! - **Listener** accepting TCP connections, one task per connection
//! - **Connection state machine**: password login, one-time code, then chat
//! - **Session registry** of online users (last login wins)
//! - **Router** persisting chat messages and fanning them out to recipients
//! - **Ports** for persistence, code delivery and attachment storage, with
//!   SQLite, log and on-disk adapters
//! - **REST API** (axum) for health checks and session inspection

pub mod api;
pub mod auth;
pub mod config;
pub mod connection;
pub mod console;
pub mod context;
pub mod error;
pub mod files;
pub mod listener;
pub mod mailer;
pub mod persistence;
pub mod ports;
pub mod registry;
pub mod requests;
pub mod router;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ServerConfig;
pub use connection::serve_connection;
pub use context::ServerContext;
pub use error::ServerError;
pub use listener::{ChatServer, ServerHandle};
pub use ports::{ChatStore, CodeMailer, FileStore};
pub use registry::{Identity, SessionHandle, SessionRegistry};
