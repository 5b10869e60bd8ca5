//! Lore DB - SQLite persistence for knowledge bases, documents, sync records and chunks.

mod database;
mod error;
mod migrations;
mod operations;

pub use database::Database;
pub use error::{DbError, DbResult};
pub use operations::stats::KnowledgeBaseStats;
pub use operations::sync_state::SyncCommit;
