//! Content store operations.
//!
//! Documents are keyed by fingerprint. A document is `staged` when a sync pass
//! writes it, becomes `current` when the pass commits, and `superseded` once a
//! newer document for the same origin is committed.
//!
//! A successful retry of a failed conversion has the failed document's
//! fingerprint. It is staged in `document_retries` and copied over the failed
//! row by the commit of its pass, so a pass that never commits leaves the
//! failed document as it was.

use super::{bad_column, parse_timestamp};
use crate::database::Database;
use crate::error::{not_found, DbResult};
use lore_core::{
    ConversionFailure, ConversionStatus, Document, FailureKind, Fingerprint, Section, SourceRef,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const DOCUMENT_COLUMNS: &str = "fingerprint, kb_id, origin_id, status, capability, title, body, \
     sections, failure_kind, failure_reason, metadata, created_at";

impl Database {
    /// Store a document as staged.
    ///
    /// Re-putting an existing fingerprint is a no-op, except that a
    /// non-failed document over a failed one is staged as a retry; stored
    /// rows are never modified here. Returns whether anything was written.
    pub fn put_document(&self, doc: &Document) -> DbResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let sections = serde_json::to_string(&doc.sections)?;
        let metadata = serde_json::to_string(&doc.metadata)?;
        let failure_kind = doc.failure.as_ref().map(|f| f.kind.as_str());
        let failure_reason = doc.failure.as_ref().map(|f| f.reason.as_str());
        let created_at = doc.created_at.to_rfc3339();

        let inserted = tx.execute(
            r#"
            INSERT INTO documents (fingerprint, kb_id, origin_id, lifecycle, status, capability, title, body,
                                   sections, failure_kind, failure_reason, metadata, created_at)
            VALUES (?1, ?2, ?3, 'staged', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
            params![
                doc.fingerprint.as_str(),
                doc.kb_id,
                doc.origin_id,
                doc.status.as_str(),
                doc.capability,
                doc.title,
                doc.text,
                sections,
                failure_kind,
                failure_reason,
                metadata,
                created_at,
            ],
        )?;

        let written = if inserted > 0 {
            true
        } else if doc.status != ConversionStatus::Failed && stored_failed(&tx, &doc.fingerprint)? {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO document_retries (fingerprint, kb_id, status, capability, title, body,
                                                         sections, failure_kind, failure_reason, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    doc.fingerprint.as_str(),
                    doc.kb_id,
                    doc.status.as_str(),
                    doc.capability,
                    doc.title,
                    doc.text,
                    sections,
                    failure_kind,
                    failure_reason,
                    metadata,
                    created_at,
                ],
            )?;
            true
        } else {
            false
        };

        tx.commit()?;
        Ok(written)
    }

    /// Number of retries waiting for their pass to commit.
    pub fn pending_retries(&self, kb_id: &str) -> DbResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM document_retries WHERE kb_id = ?1",
            params![kb_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get a document by fingerprint, whatever its lifecycle.
    pub fn get_document(&self, fingerprint: &Fingerprint) -> DbResult<Document> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM documents WHERE fingerprint = ?1", DOCUMENT_COLUMNS),
            params![fingerprint.as_str()],
            row_to_document,
        )
        .map_err(not_found(|| format!("Document not found: {}", fingerprint)))
    }

    /// Current documents of a knowledge base, one per source item.
    pub fn list_documents(&self, kb_id: &str) -> DbResult<Vec<(SourceRef, Fingerprint)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT origin_id, fingerprint FROM documents
             WHERE kb_id = ?1 AND lifecycle = 'current'
             ORDER BY origin_id",
        )?;
        let rows = stmt.query_map(params![kb_id], |row| {
            let origin_id: String = row.get(0)?;
            let fingerprint: String = row.get(1)?;
            Ok((SourceRef::new(kb_id, origin_id), Fingerprint::from(fingerprint)))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Current documents of a knowledge base with the given conversion status.
    pub fn list_documents_by_status(
        &self,
        kb_id: &str,
        status: ConversionStatus,
    ) -> DbResult<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents
             WHERE kb_id = ?1 AND lifecycle = 'current' AND status = ?2
             ORDER BY origin_id",
            DOCUMENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![kb_id, status.as_str()], row_to_document)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The current document for one source item, if any.
    pub fn current_document(&self, source: &SourceRef) -> DbResult<Option<Document>> {
        let conn = self.conn()?;
        let doc = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents
                     WHERE kb_id = ?1 AND origin_id = ?2 AND lifecycle = 'current'",
                    DOCUMENT_COLUMNS
                ),
                params![source.kb_id, source.origin_id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Delete a document and its chunks. Returns whether it existed.
    pub fn delete_document(&self, fingerprint: &Fingerprint) -> DbResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM documents WHERE fingerprint = ?1",
            params![fingerprint.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Drop documents written by a pass that never committed.
    pub fn discard_staged(&self, kb_id: &str) -> DbResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let retries = tx.execute("DELETE FROM document_retries WHERE kb_id = ?1", params![kb_id])?;
        let rows = tx.execute(
            "DELETE FROM documents WHERE kb_id = ?1 AND lifecycle = 'staged'",
            params![kb_id],
        )?;
        tx.commit()?;
        Ok(rows + retries)
    }

    /// Remove superseded documents of a knowledge base.
    pub fn purge_superseded(&self, kb_id: &str) -> DbResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM documents WHERE kb_id = ?1 AND lifecycle = 'superseded'",
            params![kb_id],
        )?;
        Ok(rows)
    }
}

fn stored_failed(conn: &Connection, fingerprint: &Fingerprint) -> DbResult<bool> {
    let status: String = conn.query_row(
        "SELECT status FROM documents WHERE fingerprint = ?1",
        params![fingerprint.as_str()],
        |row| row.get(0),
    )?;
    Ok(status == ConversionStatus::Failed.as_str())
}

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let fingerprint: String = row.get(0)?;
    let kb_id: String = row.get(1)?;
    let origin_id: String = row.get(2)?;
    let status: String = row.get(3)?;
    let sections: String = row.get(7)?;
    let failure_kind: Option<String> = row.get(8)?;
    let failure_reason: Option<String> = row.get(9)?;
    let metadata: String = row.get(10)?;
    let created_at: String = row.get(11)?;

    let failure = match failure_kind {
        Some(kind) => Some(ConversionFailure {
            kind: FailureKind::from_str(&kind).ok_or_else(|| bad_column(8, &kind))?,
            reason: failure_reason.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Document {
        fingerprint: Fingerprint::from(fingerprint),
        kb_id,
        origin_id,
        status: ConversionStatus::from_str(&status).ok_or_else(|| bad_column(3, &status))?,
        capability: row.get(4)?,
        title: row.get(5)?,
        text: row.get(6)?,
        sections: serde_json::from_str::<Vec<Section>>(&sections).unwrap_or_default(),
        failure,
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_at: parse_timestamp(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncCommit;
    use lore_core::{KnowledgeBase, KnowledgeBaseState};

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let kb = KnowledgeBase::new("docs", "alice");
        db.create_knowledge_base(&kb).unwrap();
        (db, kb.id)
    }

    fn doc(kb_id: &str, origin: &str, text: &str) -> Document {
        let source = SourceRef::new(kb_id, origin);
        Document::new(Fingerprint::compute(kb_id, origin, text.as_bytes()), &source, text)
            .with_title("Title")
            .with_sections(vec![Section::new("Intro", 1, 0)])
    }

    #[test]
    fn test_put_and_get() {
        let (db, kb_id) = setup();
        let d = doc(&kb_id, "a.md", "# Intro\nhello");
        assert!(db.put_document(&d).unwrap());

        let loaded = db.get_document(&d.fingerprint).unwrap();
        assert_eq!(loaded.text, d.text);
        assert_eq!(loaded.sections, d.sections);
        assert_eq!(loaded.status, ConversionStatus::Ok);
    }

    #[test]
    fn test_put_is_idempotent() {
        let (db, kb_id) = setup();
        let d = doc(&kb_id, "a.md", "hello");
        assert!(db.put_document(&d).unwrap());
        assert!(!db.put_document(&d).unwrap());

        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    fn failed_scan(kb_id: &str) -> Document {
        let source = SourceRef::new(kb_id, "scan.png");
        Document::failed(
            Fingerprint::compute(kb_id, "scan.png", b"png"),
            &source,
            ConversionFailure::new(FailureKind::Timeout, "ocr took too long"),
        )
    }

    #[test]
    fn test_failed_document_is_replaced_on_commit() {
        let (db, kb_id) = setup();
        let failed = failed_scan(&kb_id);
        let fp = failed.fingerprint.clone();
        db.put_document(&failed).unwrap();
        let mut commit = SyncCommit::new(&kb_id, KnowledgeBaseState::Ready);
        commit.promoted.push(fp.clone());
        db.commit_sync(&commit).unwrap();

        let ok = Document::new(fp.clone(), &failed.source_ref(), "recognised text");
        assert!(db.put_document(&ok).unwrap());
        // Invisible until the retrying pass commits
        let loaded = db.get_document(&fp).unwrap();
        assert_eq!(loaded.status, ConversionStatus::Failed);
        assert_eq!(db.pending_retries(&kb_id).unwrap(), 1);

        db.commit_sync(&commit).unwrap();
        let loaded = db.get_document(&fp).unwrap();
        assert_eq!(loaded.status, ConversionStatus::Ok);
        assert!(loaded.failure.is_none());
        assert_eq!(loaded.text, "recognised text");
        assert_eq!(db.pending_retries(&kb_id).unwrap(), 0);
    }

    #[test]
    fn test_discarded_retry_leaves_failure_intact() {
        let (db, kb_id) = setup();
        let failed = failed_scan(&kb_id);
        db.put_document(&failed).unwrap();
        let mut commit = SyncCommit::new(&kb_id, KnowledgeBaseState::Ready);
        commit.promoted.push(failed.fingerprint.clone());
        db.commit_sync(&commit).unwrap();

        let ok = Document::new(failed.fingerprint.clone(), &failed.source_ref(), "text");
        assert!(db.put_document(&ok).unwrap());
        assert_eq!(db.discard_staged(&kb_id).unwrap(), 1);

        let loaded = db.get_document(&failed.fingerprint).unwrap();
        assert_eq!(loaded.status, ConversionStatus::Failed);
        assert_eq!(loaded.failure.unwrap().reason, "ocr took too long");
        // Another failure over a failure writes nothing
        assert!(!db.put_document(&failed).unwrap());
    }

    #[test]
    fn test_staged_documents_are_not_listed() {
        let (db, kb_id) = setup();
        let d = doc(&kb_id, "a.md", "hello");
        db.put_document(&d).unwrap();
        assert!(db.list_documents(&kb_id).unwrap().is_empty());
        assert!(db.current_document(&d.source_ref()).unwrap().is_none());

        assert_eq!(db.discard_staged(&kb_id).unwrap(), 1);
        assert!(db.get_document(&d.fingerprint).is_err());
    }

    #[test]
    fn test_delete_document() {
        let (db, kb_id) = setup();
        let d = doc(&kb_id, "a.md", "hello");
        db.put_document(&d).unwrap();
        assert!(db.delete_document(&d.fingerprint).unwrap());
        assert!(!db.delete_document(&d.fingerprint).unwrap());
    }
}
