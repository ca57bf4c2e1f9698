use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A unique column (username, email, membership) already holds the value.
    #[error("{0} already exists")]
    Duplicate(&'static str),

    /// The group already has the maximum number of members.
    #[error("Group is full")]
    GroupFull,

    /// Password hashing failure.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map a UNIQUE / PRIMARY KEY violation to [`StoreError::Duplicate`].
pub(crate) fn map_unique(err: rusqlite::Error, what: &'static str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate(what)
        }
        other => StoreError::Sqlite(other),
    }
}
