//! Persisted chunks, used to rebuild the in-memory index at start-up.

use crate::database::Database;
use crate::error::DbResult;
use lore_core::{Chunk, ChunkPriority, Fingerprint};
use rusqlite::{params, Row};

const CHUNK_COLUMNS: &str =
    "fingerprint, chunk_index, kb_id, origin_id, start_offset, end_offset, priority, content";

impl Database {
    /// All chunks of a knowledge base, in document then chunk order.
    pub fn chunks_for_kb(&self, kb_id: &str) -> DbResult<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE kb_id = ?1 ORDER BY origin_id, fingerprint, chunk_index",
            CHUNK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![kb_id], row_to_chunk)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Chunks of one document.
    pub fn chunks_for_document(&self, fingerprint: &Fingerprint) -> DbResult<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE fingerprint = ?1 ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![fingerprint.as_str()], row_to_chunk)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    let fingerprint: String = row.get(0)?;
    let start: i64 = row.get(4)?;
    let end: i64 = row.get(5)?;
    let priority: i64 = row.get(6)?;

    Ok(Chunk {
        fingerprint: Fingerprint::from(fingerprint),
        chunk_index: row.get(1)?,
        kb_id: row.get(2)?,
        origin_id: row.get(3)?,
        start: start as usize,
        end: end as usize,
        priority: ChunkPriority::from_i64(priority),
        text: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncCommit;
    use lore_core::{Document, KnowledgeBase, KnowledgeBaseState, SourceRef};

    #[test]
    fn test_chunks_roundtrip_through_commit() {
        let db = Database::open_in_memory().unwrap();
        let kb = KnowledgeBase::new("docs", "alice");
        db.create_knowledge_base(&kb).unwrap();

        let text = "# Title\n\nBody text";
        let source = SourceRef::new(&kb.id, "a.md");
        let doc = Document::new(Fingerprint::compute(&kb.id, "a.md", text.as_bytes()), &source, text);
        db.put_document(&doc).unwrap();

        let chunks = vec![
            Chunk {
                fingerprint: doc.fingerprint.clone(),
                kb_id: kb.id.clone(),
                origin_id: "a.md".to_string(),
                chunk_index: 0,
                start: 0,
                end: 9,
                priority: ChunkPriority::Title,
                text: text[0..9].to_string(),
            },
            Chunk {
                fingerprint: doc.fingerprint.clone(),
                kb_id: kb.id.clone(),
                origin_id: "a.md".to_string(),
                chunk_index: 1,
                start: 9,
                end: text.len(),
                priority: ChunkPriority::Body,
                text: text[9..].to_string(),
            },
        ];

        let mut commit = SyncCommit::new(&kb.id, KnowledgeBaseState::Ready);
        commit.promoted.push(doc.fingerprint.clone());
        commit.chunks.push((doc.fingerprint.clone(), chunks.clone()));
        db.commit_sync(&commit).unwrap();

        assert_eq!(db.chunks_for_document(&doc.fingerprint).unwrap(), chunks);
        assert_eq!(db.chunks_for_kb(&kb.id).unwrap(), chunks);

        // Deleting the document cascades to its chunks
        db.delete_document(&doc.fingerprint).unwrap();
        assert!(db.chunks_for_kb(&kb.id).unwrap().is_empty());
    }
}
