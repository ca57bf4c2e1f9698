//! # parley-store
//!
//! Server-side persistence for Parley, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for accounts,
//! one-time codes, contacts, groups and messages. Callers that share it
//! across tasks wrap it in a mutex.

pub mod contacts;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
