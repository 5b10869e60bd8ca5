//! Fingerprint-keyed document storage.

use lore_core::{Document, Fingerprint, Result, SourceRef};
use lore_db::Database;
use tracing::debug;

/// Content store over the documents table.
///
/// At most one document exists per fingerprint. Writes land as staged rows
/// that a sync commit promotes; `list` only shows current documents.
#[derive(Clone)]
pub struct ContentStore {
    db: Database,
}

impl ContentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a document. Re-putting a stored fingerprint is a no-op, unless it
    /// succeeds where the stored one failed; that retry applies on commit.
    pub fn put(&self, doc: &Document) -> Result<bool> {
        let written = self.db.put_document(doc)?;
        if !written {
            debug!("Document {} already stored", doc.fingerprint.short());
        }
        Ok(written)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Document> {
        Ok(self.db.get_document(fingerprint)?)
    }

    /// Current documents of a knowledge base, one per source item.
    pub fn list(&self, kb_id: &str) -> Result<Vec<(SourceRef, Fingerprint)>> {
        Ok(self.db.list_documents(kb_id)?)
    }

    pub fn current(&self, source: &SourceRef) -> Result<Option<Document>> {
        Ok(self.db.current_document(source)?)
    }

    /// Delete a document and its chunks. Returns whether it existed.
    pub fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.db.delete_document(fingerprint)?)
    }

    /// Drop rows written by a pass that never committed.
    pub fn discard_staged(&self, kb_id: &str) -> Result<usize> {
        Ok(self.db.discard_staged(kb_id)?)
    }

    pub fn purge_superseded(&self, kb_id: &str) -> Result<usize> {
        Ok(self.db.purge_superseded(kb_id)?)
    }
}
