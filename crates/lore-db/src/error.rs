//! Database error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Other(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for lore_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => lore_core::Error::NotFound(what),
            DbError::Conflict(what) => lore_core::Error::InvalidState(what),
            other => lore_core::Error::Database(other.to_string()),
        }
    }
}

/// Map a missing row to `NotFound`, everything else to `Sqlite`.
pub(crate) fn not_found(what: impl FnOnce() -> String) -> impl FnOnce(rusqlite::Error) -> DbError {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(what()),
        _ => DbError::from(e),
    }
}
