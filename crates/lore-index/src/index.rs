//! Per knowledge base index generations and ranked queries.
//!
//! Each knowledge base has one immutable [`Generation`] behind an `Arc`.
//! Writers clone it into a [`GenerationBuilder`], apply changes, and publish
//! the result with a single pointer swap, so a query sees either the old or
//! the new generation and never a mix.

use crate::chunker::Chunker;
use crate::scorer::{CorpusStats, Scorer};
use crate::tokenize::{query_terms, tokenize};
use lore_core::{Chunk, Document, Fingerprint, KbId};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// How many chunks are scored between deadline checks.
const DEADLINE_CHECK_EVERY: usize = 256;

/// A chunk with its term statistics.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub term_freqs: HashMap<String, u32>,
    pub length: u32,
}

impl IndexedChunk {
    pub fn new(chunk: Chunk) -> Self {
        let mut term_freqs = HashMap::new();
        let mut length = 0u32;
        for term in tokenize(&chunk.text) {
            *term_freqs.entry(term).or_insert(0) += 1;
            length += 1;
        }
        Self {
            chunk,
            term_freqs,
            length,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_text(text: &str) -> Self {
        Self::new(Chunk {
            fingerprint: Fingerprint::from(String::from("test")),
            kb_id: "kb".to_string(),
            origin_id: "test.txt".to_string(),
            chunk_index: 0,
            start: 0,
            end: text.len(),
            priority: lore_core::ChunkPriority::Body,
            text: text.to_string(),
        })
    }
}

#[derive(Debug)]
struct IndexedDocument {
    origin_id: String,
    chunks: Vec<IndexedChunk>,
}

/// Immutable snapshot of one knowledge base's index.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub version: u64,
    documents: BTreeMap<Fingerprint, Arc<IndexedDocument>>,
    by_origin: HashMap<String, Fingerprint>,
    doc_freq: HashMap<String, usize>,
    total_len: u64,
    chunk_count: usize,
}

impl Generation {
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.documents.contains_key(fingerprint)
    }

    fn insert(&mut self, fingerprint: Fingerprint, doc: IndexedDocument) {
        if let Some(previous) = self.by_origin.get(&doc.origin_id).cloned() {
            self.delete(&previous);
        }
        for chunk in &doc.chunks {
            for term in chunk.term_freqs.keys() {
                *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            self.total_len += chunk.length as u64;
        }
        self.chunk_count += doc.chunks.len();
        self.by_origin.insert(doc.origin_id.clone(), fingerprint.clone());
        self.documents.insert(fingerprint, Arc::new(doc));
    }

    fn delete(&mut self, fingerprint: &Fingerprint) -> bool {
        let Some(doc) = self.documents.remove(fingerprint) else {
            return false;
        };
        for chunk in &doc.chunks {
            for term in chunk.term_freqs.keys() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df -= 1;
                    if *df == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
            self.total_len -= chunk.length as u64;
        }
        self.chunk_count -= doc.chunks.len();
        if self.by_origin.get(&doc.origin_id) == Some(fingerprint) {
            self.by_origin.remove(&doc.origin_id);
        }
        true
    }
}

/// Pending changes to one knowledge base's generation.
#[derive(Debug)]
pub struct GenerationBuilder {
    kb_id: KbId,
    generation: Generation,
    chunker: Chunker,
}

impl GenerationBuilder {
    pub fn kb_id(&self) -> &str {
        &self.kb_id
    }

    /// Chunk and add a document, replacing any earlier version of its origin.
    ///
    /// Failed documents are not indexed; adding one still evicts the earlier
    /// version. Returns the chunks that were indexed.
    pub fn add(&mut self, doc: &Document) -> Vec<Chunk> {
        if doc.kb_id != self.kb_id {
            warn!(
                "Refusing to index {} from {} into {}",
                doc.origin_id, doc.kb_id, self.kb_id
            );
            return Vec::new();
        }

        if doc.is_failed() {
            self.remove_origin(&doc.origin_id);
            return Vec::new();
        }

        let chunks = self.chunker.chunk_document(doc);
        self.insert_chunks(doc.fingerprint.clone(), doc.origin_id.clone(), chunks.clone());
        chunks
    }

    /// Add persisted chunks of one document without re-chunking.
    pub fn add_chunks(&mut self, fingerprint: Fingerprint, origin_id: String, chunks: Vec<Chunk>) {
        self.insert_chunks(fingerprint, origin_id, chunks);
    }

    pub fn remove(&mut self, fingerprint: &Fingerprint) -> bool {
        self.generation.delete(fingerprint)
    }

    pub fn remove_origin(&mut self, origin_id: &str) -> Option<Fingerprint> {
        let fingerprint = self.generation.by_origin.get(origin_id).cloned()?;
        self.generation.delete(&fingerprint);
        Some(fingerprint)
    }

    fn insert_chunks(&mut self, fingerprint: Fingerprint, origin_id: String, chunks: Vec<Chunk>) {
        let doc = IndexedDocument {
            origin_id,
            chunks: chunks.into_iter().map(IndexedChunk::new).collect(),
        };
        self.generation.insert(fingerprint, doc);
    }
}

/// A chunk returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Result of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub hits: Vec<ScoredChunk>,
    /// The deadline passed before every chunk was scored.
    pub partial: bool,
}

/// In-memory retrieval index over all knowledge bases.
#[derive(Debug)]
pub struct Index {
    chunker: Chunker,
    scorer: Arc<dyn Scorer>,
    generations: RwLock<HashMap<KbId, Arc<Generation>>>,
}

impl Index {
    pub fn new(chunker: Chunker, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            chunker,
            scorer,
            generations: RwLock::new(HashMap::new()),
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }

    /// Current generation of a knowledge base.
    pub fn generation(&self, kb_id: &str) -> Option<Arc<Generation>> {
        self.read().get(kb_id).cloned()
    }

    /// Start modifying a knowledge base's generation.
    pub fn begin(&self, kb_id: &str) -> GenerationBuilder {
        let generation = self
            .generation(kb_id)
            .map(|g| g.as_ref().clone())
            .unwrap_or_default();
        GenerationBuilder {
            kb_id: kb_id.to_string(),
            generation,
            chunker: self.chunker.clone(),
        }
    }

    /// Make a builder's generation visible to queries. Returns its version.
    pub fn publish(&self, builder: GenerationBuilder) -> u64 {
        let GenerationBuilder {
            kb_id,
            mut generation,
            ..
        } = builder;

        let mut generations = self.write();
        generation.version = generations.get(&kb_id).map(|g| g.version + 1).unwrap_or(1);
        let version = generation.version;
        debug!(
            "Publishing generation {} for {} ({} documents, {} chunks)",
            version,
            kb_id,
            generation.document_count(),
            generation.chunk_count()
        );
        generations.insert(kb_id, Arc::new(generation));
        version
    }

    /// Index one document and publish immediately.
    pub fn index(&self, doc: &Document) -> Vec<Chunk> {
        let mut builder = self.begin(&doc.kb_id);
        let chunks = builder.add(doc);
        self.publish(builder);
        chunks
    }

    /// Remove a document from whichever knowledge base holds it.
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        let owner = self
            .read()
            .iter()
            .find(|(_, g)| g.contains(fingerprint))
            .map(|(kb, _)| kb.clone());

        match owner {
            Some(kb_id) => {
                let mut builder = self.begin(&kb_id);
                builder.remove(fingerprint);
                self.publish(builder);
                true
            }
            None => false,
        }
    }

    /// Replace a knowledge base's generation with persisted chunks.
    pub fn load(&self, kb_id: &str, chunks: Vec<Chunk>) -> u64 {
        let mut grouped: BTreeMap<Fingerprint, (String, Vec<Chunk>)> = BTreeMap::new();
        for chunk in chunks {
            grouped
                .entry(chunk.fingerprint.clone())
                .or_insert_with(|| (chunk.origin_id.clone(), Vec::new()))
                .1
                .push(chunk);
        }

        let mut builder = GenerationBuilder {
            kb_id: kb_id.to_string(),
            generation: Generation::default(),
            chunker: self.chunker.clone(),
        };
        for (fingerprint, (origin_id, mut chunks)) in grouped {
            chunks.sort_by_key(|c| c.chunk_index);
            builder.add_chunks(fingerprint, origin_id, chunks);
        }
        self.publish(builder)
    }

    /// Forget a knowledge base entirely.
    pub fn drop_base(&self, kb_id: &str) -> bool {
        self.write().remove(kb_id).is_some()
    }

    /// Rank chunks of the given knowledge bases against `text`.
    ///
    /// Only generations of `kb_ids` are touched; callers pass the bases the
    /// principal is authorized to read. Results are ordered by score, then
    /// structural priority, then earlier offset. At most `top_k` are returned.
    pub fn query(
        &self,
        kb_ids: &[KbId],
        text: &str,
        top_k: usize,
        deadline: Option<Instant>,
    ) -> QueryOutcome {
        let terms = query_terms(text);
        if terms.is_empty() || top_k == 0 {
            return QueryOutcome::default();
        }

        let generations: Vec<Arc<Generation>> = {
            let guard = self.read();
            let mut seen = HashSet::new();
            kb_ids
                .iter()
                .filter(|kb| seen.insert(kb.as_str()))
                .filter_map(|kb| guard.get(kb).cloned())
                .collect()
        };

        let stats = corpus_stats(&generations, &terms);
        let mut candidates: Vec<(f64, &IndexedChunk)> = Vec::new();
        let mut scanned = 0usize;
        let mut partial = false;

        'scan: for generation in &generations {
            for doc in generation.documents.values() {
                for chunk in &doc.chunks {
                    scanned += 1;
                    if scanned % DEADLINE_CHECK_EVERY == 0 {
                        if let Some(deadline) = deadline {
                            if Instant::now() >= deadline {
                                partial = true;
                                break 'scan;
                            }
                        }
                    }
                    if !terms.iter().any(|t| chunk.term_freqs.contains_key(t)) {
                        continue;
                    }
                    let score = self.scorer.score(&terms, chunk, &stats);
                    if score > 0.0 {
                        candidates.push((score, chunk));
                    }
                }
            }
        }

        candidates.sort_by(|a, b| rank(a, b));
        candidates.truncate(top_k);

        if partial {
            debug!("Query deadline reached after {} chunks", scanned);
        }

        QueryOutcome {
            hits: candidates
                .into_iter()
                .map(|(score, c)| ScoredChunk {
                    chunk: c.chunk.clone(),
                    score,
                })
                .collect(),
            partial,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<KbId, Arc<Generation>>> {
        // A panic while holding the lock cannot leave a half-swapped map
        self.generations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<KbId, Arc<Generation>>> {
        self.generations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn corpus_stats(generations: &[Arc<Generation>], terms: &[String]) -> CorpusStats {
    let chunk_count: usize = generations.iter().map(|g| g.chunk_count).sum();
    let total_len: u64 = generations.iter().map(|g| g.total_len).sum();
    let doc_freq = terms
        .iter()
        .map(|t| {
            let df = generations
                .iter()
                .map(|g| g.doc_freq.get(t).copied().unwrap_or(0))
                .sum();
            (t.clone(), df)
        })
        .collect();

    CorpusStats {
        chunk_count,
        avg_len: if chunk_count > 0 {
            total_len as f64 / chunk_count as f64
        } else {
            0.0
        },
        doc_freq,
    }
}

fn rank(a: &(f64, &IndexedChunk), b: &(f64, &IndexedChunk)) -> Ordering {
    let (ca, cb) = (&a.1.chunk, &b.1.chunk);
    b.0.total_cmp(&a.0)
        .then_with(|| cb.priority.cmp(&ca.priority))
        .then_with(|| ca.start.cmp(&cb.start))
        .then_with(|| ca.kb_id.cmp(&cb.kb_id))
        .then_with(|| ca.origin_id.cmp(&cb.origin_id))
        .then_with(|| ca.chunk_index.cmp(&cb.chunk_index))
}
