//! Database migrations and schema management.

use crate::error::DbResult;
use rusqlite::Connection;
use tracing::info;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> DbResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating initial database schema...");
        create_initial_schema(conn)?;
        create_retry_table(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating database from version {} to {}",
            current_version, SCHEMA_VERSION
        );
        if current_version < 2 {
            create_retry_table(conn)?;
        }
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> DbResult<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn create_initial_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            owner TEXT NOT NULL,
            is_public INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'empty',
            cursor_version INTEGER,
            synced_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kb_grants (
            kb_id TEXT NOT NULL REFERENCES knowledge_bases(id) ON DELETE CASCADE,
            principal TEXT NOT NULL,
            mode TEXT NOT NULL,
            granted_at TEXT NOT NULL,
            PRIMARY KEY (kb_id, principal)
        );

        -- lifecycle: staged (written by a running pass), current, superseded
        CREATE TABLE IF NOT EXISTS documents (
            fingerprint TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL REFERENCES knowledge_bases(id) ON DELETE CASCADE,
            origin_id TEXT NOT NULL,
            lifecycle TEXT NOT NULL DEFAULT 'staged',
            status TEXT NOT NULL,
            capability TEXT,
            title TEXT,
            body TEXT NOT NULL,
            sections TEXT NOT NULL DEFAULT '[]',
            failure_kind TEXT,
            failure_reason TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            superseded_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(kb_id, origin_id);
        CREATE INDEX IF NOT EXISTS idx_documents_lifecycle ON documents(kb_id, lifecycle);

        CREATE TABLE IF NOT EXISTS sync_records (
            kb_id TEXT NOT NULL REFERENCES knowledge_bases(id) ON DELETE CASCADE,
            origin_id TEXT NOT NULL,
            proxy TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            last_attempt_at TEXT NOT NULL,
            PRIMARY KEY (kb_id, origin_id)
        );

        CREATE TABLE IF NOT EXISTS chunks (
            fingerprint TEXT NOT NULL REFERENCES documents(fingerprint) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            kb_id TEXT NOT NULL,
            origin_id TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            content TEXT NOT NULL,
            PRIMARY KEY (fingerprint, chunk_index)
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_kb ON chunks(kb_id);
        "#,
    )?;

    Ok(())
}

/// Version 2: successful retries of failed documents wait here until their
/// pass commits.
fn create_retry_table(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS document_retries (
            fingerprint TEXT PRIMARY KEY REFERENCES documents(fingerprint) ON DELETE CASCADE,
            kb_id TEXT NOT NULL,
            status TEXT NOT NULL,
            capability TEXT,
            title TEXT,
            body TEXT NOT NULL,
            sections TEXT NOT NULL DEFAULT '[]',
            failure_kind TEXT,
            failure_reason TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_document_retries_kb ON document_retries(kb_id);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('knowledge_bases', 'kb_grants', 'documents', 'sync_records', 'chunks')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_version_one_gains_retry_table() {
        let conn = Connection::open_in_memory().unwrap();
        create_initial_schema(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let retries: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'document_retries'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(retries, 1);
    }
}

