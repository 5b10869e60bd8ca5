//! Per knowledge base statistics.

use crate::database::Database;
use crate::error::DbResult;
use rusqlite::params;

/// Counts describing one knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeBaseStats {
    pub documents: i64,
    pub ok: i64,
    pub partial: i64,
    pub failed: i64,
    pub superseded: i64,
    pub chunks: i64,
    pub text_bytes: i64,
}

impl Database {
    /// Gather statistics for a knowledge base.
    pub fn kb_stats(&self, kb_id: &str) -> DbResult<KnowledgeBaseStats> {
        let conn = self.conn()?;
        let mut stats = KnowledgeBaseStats::default();

        {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*), COALESCE(SUM(LENGTH(CAST(body AS BLOB))), 0)
                 FROM documents WHERE kb_id = ?1 AND lifecycle = 'current'
                 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![kb_id], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let bytes: i64 = row.get(2)?;
                Ok((status, count, bytes))
            })?;
            for row in rows {
                let (status, count, bytes) = row?;
                stats.documents += count;
                stats.text_bytes += bytes;
                match status.as_str() {
                    "ok" => stats.ok = count,
                    "partial" => stats.partial = count,
                    "failed" => stats.failed = count,
                    _ => {}
                }
            }
        }

        stats.superseded = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE kb_id = ?1 AND lifecycle = 'superseded'",
            params![kb_id],
            |row| row.get(0),
        )?;

        stats.chunks = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE kb_id = ?1",
            params![kb_id],
            |row| row.get(0),
        )?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncCommit;
    use lore_core::{
        ConversionFailure, Document, FailureKind, Fingerprint, KnowledgeBase, KnowledgeBaseState,
        SourceRef,
    };

    #[test]
    fn test_kb_stats() {
        let db = Database::open_in_memory().unwrap();
        let kb = KnowledgeBase::new("docs", "alice");
        db.create_knowledge_base(&kb).unwrap();

        let ok = Document::new(
            Fingerprint::compute(&kb.id, "a.md", b"hello"),
            &SourceRef::new(&kb.id, "a.md"),
            "hello",
        );
        let failed = Document::failed(
            Fingerprint::compute(&kb.id, "b.bin", b"\0"),
            &SourceRef::new(&kb.id, "b.bin"),
            ConversionFailure::new(FailureKind::Unsupported, "no converter for .bin"),
        );
        db.put_document(&ok).unwrap();
        db.put_document(&failed).unwrap();

        // Staged documents do not count
        assert_eq!(db.kb_stats(&kb.id).unwrap().documents, 0);

        let mut commit = SyncCommit::new(&kb.id, KnowledgeBaseState::Ready);
        commit.promoted = vec![ok.fingerprint.clone(), failed.fingerprint.clone()];
        db.commit_sync(&commit).unwrap();

        let stats = db.kb_stats(&kb.id).unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.ok, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.text_bytes, 5);
        assert_eq!(stats.chunks, 0);
    }
}
