//! Recorded map and atomic commit of a sync pass.

use super::{bad_column, parse_timestamp};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use chrono::Utc;
use lore_core::{
    Chunk, ConversionStatus, Fingerprint, FingerprintProxy, KnowledgeBaseState, SyncCursor,
    SyncRecord,
};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::debug;

/// Everything a sync pass changes, applied in one transaction.
#[derive(Debug, Clone)]
pub struct SyncCommit {
    pub kb_id: String,
    /// Records for items completed in this pass (inserted or replaced).
    pub records: Vec<SyncRecord>,
    /// Origins that disappeared from the source.
    pub removed: Vec<String>,
    /// Staged documents that become current.
    pub promoted: Vec<Fingerprint>,
    /// Current documents replaced by a newer version; their chunks are dropped.
    pub retired: Vec<Fingerprint>,
    /// Documents deleted outright (origins removed from the source).
    pub deleted: Vec<Fingerprint>,
    /// Full chunk sets per document, replacing any stored chunks.
    pub chunks: Vec<(Fingerprint, Vec<Chunk>)>,
    /// New cursor, when the pass ran to completion.
    pub cursor: Option<SyncCursor>,
    pub state: KnowledgeBaseState,
}

impl SyncCommit {
    pub fn new(kb_id: impl Into<String>, state: KnowledgeBaseState) -> Self {
        Self {
            kb_id: kb_id.into(),
            records: Vec::new(),
            removed: Vec::new(),
            promoted: Vec::new(),
            retired: Vec::new(),
            deleted: Vec::new(),
            chunks: Vec::new(),
            cursor: None,
            state,
        }
    }
}

impl Database {
    /// Load the recorded origin map of a knowledge base.
    pub fn load_sync_records(&self, kb_id: &str) -> DbResult<HashMap<String, SyncRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT origin_id, proxy, fingerprint, status, attempts, last_attempt_at
             FROM sync_records WHERE kb_id = ?1",
        )?;
        let rows = stmt.query_map(params![kb_id], row_to_sync_record)?;

        let mut records = HashMap::new();
        for row in rows {
            let record = row?;
            records.insert(record.origin_id.clone(), record);
        }
        Ok(records)
    }

    /// Apply a sync pass atomically.
    ///
    /// Fails with `Conflict` if the knowledge base was deleted meanwhile, in
    /// which case nothing is written.
    pub fn commit_sync(&self, commit: &SyncCommit) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let state: Option<String> = tx
            .query_row(
                "SELECT state FROM knowledge_bases WHERE id = ?1",
                params![commit.kb_id],
                |row| row.get(0),
            )
            .optional()?;
        match state.as_deref() {
            None => {
                return Err(DbError::NotFound(format!(
                    "Knowledge base not found: {}",
                    commit.kb_id
                )))
            }
            Some("deleted") => {
                return Err(DbError::Conflict(format!(
                    "Knowledge base was deleted during sync: {}",
                    commit.kb_id
                )))
            }
            Some(_) => {}
        }

        for fp in &commit.retired {
            tx.execute("DELETE FROM chunks WHERE fingerprint = ?1", params![fp.as_str()])?;
            tx.execute(
                "UPDATE documents SET lifecycle = 'superseded', superseded_at = ?2
                 WHERE fingerprint = ?1",
                params![fp.as_str(), now],
            )?;
        }

        for fp in &commit.deleted {
            tx.execute("DELETE FROM documents WHERE fingerprint = ?1", params![fp.as_str()])?;
        }

        for fp in &commit.promoted {
            tx.execute(
                r#"
                UPDATE documents SET
                    (status, capability, title, body, sections, failure_kind, failure_reason, metadata, created_at) =
                    (SELECT status, capability, title, body, sections, failure_kind, failure_reason, metadata, created_at
                     FROM document_retries WHERE fingerprint = ?1)
                WHERE fingerprint = ?1
                  AND EXISTS (SELECT 1 FROM document_retries WHERE fingerprint = ?1)
                "#,
                params![fp.as_str()],
            )?;
            tx.execute(
                "UPDATE documents SET lifecycle = 'current', superseded_at = NULL
                 WHERE fingerprint = ?1",
                params![fp.as_str()],
            )?;
        }
        // Retries of documents this pass did not promote are stale
        tx.execute(
            "DELETE FROM document_retries WHERE kb_id = ?1",
            params![commit.kb_id],
        )?;

        {
            let mut delete = tx.prepare("DELETE FROM chunks WHERE fingerprint = ?1")?;
            let mut insert = tx.prepare(
                r#"
                INSERT INTO chunks (fingerprint, chunk_index, kb_id, origin_id, start_offset, end_offset, priority, content)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for (fp, chunks) in &commit.chunks {
                delete.execute(params![fp.as_str()])?;
                for chunk in chunks {
                    insert.execute(params![
                        chunk.fingerprint.as_str(),
                        chunk.chunk_index,
                        chunk.kb_id,
                        chunk.origin_id,
                        chunk.start as i64,
                        chunk.end as i64,
                        chunk.priority.as_i64(),
                        chunk.text,
                    ])?;
                }
            }
        }

        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO sync_records (kb_id, origin_id, proxy, fingerprint, status, attempts, last_attempt_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(kb_id, origin_id) DO UPDATE SET
                    proxy = excluded.proxy,
                    fingerprint = excluded.fingerprint,
                    status = excluded.status,
                    attempts = excluded.attempts,
                    last_attempt_at = excluded.last_attempt_at
                "#,
            )?;
            for record in &commit.records {
                upsert.execute(params![
                    commit.kb_id,
                    record.origin_id,
                    record.proxy.as_string(),
                    record.fingerprint.as_str(),
                    record.status.as_str(),
                    record.attempts,
                    record.last_attempt_at.to_rfc3339(),
                ])?;
            }

            let mut remove =
                tx.prepare("DELETE FROM sync_records WHERE kb_id = ?1 AND origin_id = ?2")?;
            for origin in &commit.removed {
                remove.execute(params![commit.kb_id, origin])?;
            }
        }

        match commit.cursor {
            Some(cursor) => tx.execute(
                "UPDATE knowledge_bases SET state = ?2, cursor_version = ?3, synced_at = ?4 WHERE id = ?1",
                params![
                    commit.kb_id,
                    commit.state.as_str(),
                    cursor.version as i64,
                    cursor.synced_at.to_rfc3339(),
                ],
            )?,
            None => tx.execute(
                "UPDATE knowledge_bases SET state = ?2 WHERE id = ?1",
                params![commit.kb_id, commit.state.as_str()],
            )?,
        };

        tx.commit()?;
        debug!(
            "Committed sync for {}: {} records, {} removed, {} promoted, {} retired",
            commit.kb_id,
            commit.records.len(),
            commit.removed.len(),
            commit.promoted.len(),
            commit.retired.len()
        );
        Ok(())
    }
}

fn row_to_sync_record(row: &Row) -> rusqlite::Result<SyncRecord> {
    let proxy: String = row.get(1)?;
    let fingerprint: String = row.get(2)?;
    let status: String = row.get(3)?;
    let last_attempt_at: String = row.get(5)?;

    Ok(SyncRecord {
        origin_id: row.get(0)?,
        proxy: FingerprintProxy::parse(&proxy).ok_or_else(|| bad_column(1, &proxy))?,
        fingerprint: Fingerprint::from(fingerprint),
        status: ConversionStatus::from_str(&status).ok_or_else(|| bad_column(3, &status))?,
        attempts: row.get(4)?,
        last_attempt_at: parse_timestamp(&last_attempt_at),
    })
}
