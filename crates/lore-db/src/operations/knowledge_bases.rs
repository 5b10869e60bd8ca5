//! Knowledge base registry operations.

use super::{bad_column, parse_timestamp};
use crate::database::Database;
use crate::error::{not_found, DbError, DbResult};
use chrono::{TimeZone, Utc};
use lore_core::{AccessMode, AccessPolicy, Grant, KnowledgeBase, KnowledgeBaseState, SyncCursor};
use rusqlite::{params, Connection, OptionalExtension, Row};

const KB_COLUMNS: &str =
    "id, name, owner, is_public, state, cursor_version, synced_at, created_at";

impl Database {
    /// Insert a new knowledge base. Names are unique.
    pub fn create_knowledge_base(&self, kb: &KnowledgeBase) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let taken: Option<String> = tx
            .query_row(
                "SELECT id FROM knowledge_bases WHERE name = ?1",
                params![kb.name],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(DbError::Conflict(format!(
                "Knowledge base name already in use: {}",
                kb.name
            )));
        }

        tx.execute(
            r#"
            INSERT INTO knowledge_bases (id, name, owner, is_public, state, cursor_version, synced_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                kb.id,
                kb.name,
                kb.policy.owner,
                kb.policy.public,
                kb.state.as_str(),
                kb.cursor.map(|c| c.version as i64),
                kb.cursor.map(|c| c.synced_at.to_rfc3339()),
                kb.created_at.to_rfc3339(),
            ],
        )?;
        for grant in &kb.policy.grants {
            insert_grant(&tx, &kb.id, &grant.principal, grant.mode)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Get a knowledge base by ID, including its grants.
    pub fn get_knowledge_base(&self, id: &str) -> DbResult<KnowledgeBase> {
        let conn = self.conn()?;
        let mut kb = conn
            .query_row(
                &format!("SELECT {} FROM knowledge_bases WHERE id = ?1", KB_COLUMNS),
                params![id],
                row_to_knowledge_base,
            )
            .map_err(not_found(|| format!("Knowledge base not found: {}", id)))?;
        kb.policy.grants = load_grants(&conn, &kb.id)?;
        Ok(kb)
    }

    /// Find a knowledge base by its unique name.
    pub fn find_knowledge_base(&self, name: &str) -> DbResult<Option<KnowledgeBase>> {
        let conn = self.conn()?;
        let kb = conn
            .query_row(
                &format!("SELECT {} FROM knowledge_bases WHERE name = ?1", KB_COLUMNS),
                params![name],
                row_to_knowledge_base,
            )
            .optional()?;
        match kb {
            Some(mut kb) => {
                kb.policy.grants = load_grants(&conn, &kb.id)?;
                Ok(Some(kb))
            }
            None => Ok(None),
        }
    }

    /// List knowledge bases ordered by name. Deleted ones are skipped.
    pub fn list_knowledge_bases(&self) -> DbResult<Vec<KnowledgeBase>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM knowledge_bases WHERE state != 'deleted' ORDER BY name",
            KB_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_knowledge_base)?;
        let mut kbs = rows.collect::<Result<Vec<_>, _>>()?;
        for kb in &mut kbs {
            kb.policy.grants = load_grants(&conn, &kb.id)?;
        }
        Ok(kbs)
    }

    /// Persist a lifecycle state.
    pub fn set_knowledge_base_state(&self, id: &str, state: KnowledgeBaseState) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE knowledge_bases SET state = ?2 WHERE id = ?1",
            params![id, state.as_str()],
        )?;
        if rows == 0 {
            return Err(DbError::NotFound(format!("Knowledge base not found: {}", id)));
        }
        Ok(())
    }

    /// Move from `from` to `to` in a single conditional update.
    ///
    /// Returns false, changing nothing, when the stored state is not `from`.
    pub fn compare_and_set_knowledge_base_state(
        &self,
        id: &str,
        from: KnowledgeBaseState,
        to: KnowledgeBaseState,
    ) -> DbResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE knowledge_bases SET state = ?3 WHERE id = ?1 AND state = ?2",
            params![id, from.as_str(), to.as_str()],
        )?;
        Ok(rows == 1)
    }

    pub fn set_knowledge_base_public(&self, id: &str, public: bool) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE knowledge_bases SET is_public = ?2 WHERE id = ?1",
            params![id, public],
        )?;
        if rows == 0 {
            return Err(DbError::NotFound(format!("Knowledge base not found: {}", id)));
        }
        Ok(())
    }

    /// Add or replace a principal's grant.
    pub fn upsert_grant(&self, kb_id: &str, principal: &str, mode: AccessMode) -> DbResult<()> {
        let conn = self.conn()?;
        insert_grant(&conn, kb_id, principal, mode)
    }

    /// Remove a principal's grant. Returns whether a grant was removed.
    pub fn delete_grant(&self, kb_id: &str, principal: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM kb_grants WHERE kb_id = ?1 AND principal = ?2",
            params![kb_id, principal],
        )?;
        Ok(rows > 0)
    }

    /// Remove a knowledge base and everything it owns.
    pub fn purge_knowledge_base(&self, id: &str) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE kb_id = ?1", params![id])?;
        tx.execute("DELETE FROM sync_records WHERE kb_id = ?1", params![id])?;
        tx.execute("DELETE FROM documents WHERE kb_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM knowledge_bases WHERE id = ?1", params![id])?;
        tx.commit()?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Knowledge base not found: {}", id)));
        }
        Ok(())
    }
}

fn insert_grant(conn: &Connection, kb_id: &str, principal: &str, mode: AccessMode) -> DbResult<()> {
    let rows = conn.execute(
        r#"
        INSERT INTO kb_grants (kb_id, principal, mode, granted_at)
        SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM knowledge_bases WHERE id = ?1)
        ON CONFLICT(kb_id, principal) DO UPDATE SET mode = excluded.mode
        "#,
        params![kb_id, principal, mode.as_str(), Utc::now().to_rfc3339()],
    )?;
    if rows == 0 {
        return Err(DbError::NotFound(format!("Knowledge base not found: {}", kb_id)));
    }
    Ok(())
}

fn load_grants(conn: &Connection, kb_id: &str) -> DbResult<Vec<Grant>> {
    let mut stmt = conn.prepare(
        "SELECT principal, mode FROM kb_grants WHERE kb_id = ?1 ORDER BY principal",
    )?;
    let rows = stmt.query_map(params![kb_id], |row| {
        let principal: String = row.get(0)?;
        let mode: String = row.get(1)?;
        let mode = AccessMode::from_str(&mode).ok_or_else(|| bad_column(1, &mode))?;
        Ok(Grant { principal, mode })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Map a row to a knowledge base with an empty grant list.
fn row_to_knowledge_base(row: &Row) -> rusqlite::Result<KnowledgeBase> {
    let owner: String = row.get(2)?;
    let state: String = row.get(4)?;
    let cursor_version: Option<i64> = row.get(5)?;
    let synced_at: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;

    let cursor = match (cursor_version, synced_at) {
        (Some(version), Some(at)) => Some(SyncCursor {
            version: version as u64,
            synced_at: parse_timestamp(&at),
        }),
        (Some(version), None) => Some(SyncCursor {
            version: version as u64,
            synced_at: Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now),
        }),
        _ => None,
    };

    let mut policy = AccessPolicy::new(owner);
    policy.public = row.get(3)?;

    Ok(KnowledgeBase {
        id: row.get(0)?,
        name: row.get(1)?,
        policy,
        state: KnowledgeBaseState::from_str(&state).ok_or_else(|| bad_column(4, &state))?,
        cursor,
        created_at: parse_timestamp(&created_at),
    })
}
