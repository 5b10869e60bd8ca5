//! Relevance scoring.

use crate::error::{IndexError, IndexResult};
use crate::index::IndexedChunk;
use std::collections::HashMap;
use std::sync::Arc;

/// Statistics over the chunks a query may see.
#[derive(Debug, Clone, Default)]
pub struct CorpusStats {
    pub chunk_count: usize,
    pub avg_len: f64,
    /// Number of chunks containing each query term.
    pub doc_freq: HashMap<String, usize>,
}

/// Scores one chunk against a query. Zero means "no match".
pub trait Scorer: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn score(&self, terms: &[String], chunk: &IndexedChunk, stats: &CorpusStats) -> f64;
}

/// Okapi BM25.
#[derive(Debug, Clone, Copy)]
pub struct Bm25 {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25 {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Scorer for Bm25 {
    fn name(&self) -> &'static str {
        "bm25"
    }

    fn score(&self, terms: &[String], chunk: &IndexedChunk, stats: &CorpusStats) -> f64 {
        let n = stats.chunk_count as f64;
        let avg_len = if stats.avg_len > 0.0 { stats.avg_len } else { 1.0 };
        let norm = self.k1 * (1.0 - self.b + self.b * chunk.length as f64 / avg_len);

        terms
            .iter()
            .filter_map(|term| {
                let tf = *chunk.term_freqs.get(term)? as f64;
                let df = *stats.doc_freq.get(term).unwrap_or(&0) as f64;
                // Non-negative idf variant
                let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                Some(idf * tf * (self.k1 + 1.0) / (tf + norm))
            })
            .sum()
    }
}

/// Fraction of distinct query terms present in the chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlap;

impl Scorer for TermOverlap {
    fn name(&self) -> &'static str {
        "overlap"
    }

    fn score(&self, terms: &[String], chunk: &IndexedChunk, _stats: &CorpusStats) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let matched = terms
            .iter()
            .filter(|t| chunk.term_freqs.contains_key(*t))
            .count();
        matched as f64 / terms.len() as f64
    }
}

/// Build the scorer named in the retrieval settings.
pub fn scorer_from_config(config: &lore_config::RetrievalConfig) -> IndexResult<Arc<dyn Scorer>> {
    match config.scorer.as_str() {
        "bm25" => Ok(Arc::new(Bm25 {
            k1: config.bm25_k1,
            b: config.bm25_b,
        })),
        "overlap" => Ok(Arc::new(TermOverlap)),
        other => Err(IndexError::UnknownScorer(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::query_terms;

    fn stats(chunks: &[&IndexedChunk], terms: &[String]) -> CorpusStats {
        let total: u32 = chunks.iter().map(|c| c.length).sum();
        CorpusStats {
            chunk_count: chunks.len(),
            avg_len: total as f64 / chunks.len() as f64,
            doc_freq: terms
                .iter()
                .map(|t| {
                    let df = chunks.iter().filter(|c| c.term_freqs.contains_key(t)).count();
                    (t.clone(), df)
                })
                .collect(),
        }
    }

    #[test]
    fn test_bm25_prefers_rarer_terms() {
        let common = IndexedChunk::from_text("deploy service deploy");
        let rare = IndexedChunk::from_text("rollback service");
        let other = IndexedChunk::from_text("service deploy notes");
        let terms = query_terms("rollback deploy");
        let s = stats(&[&common, &rare, &other], &terms);

        let scorer = Bm25::default();
        let rare_score = scorer.score(&terms, &rare, &s);
        let common_score = scorer.score(&terms, &common, &s);
        assert!(rare_score > 0.0);
        assert!(common_score > 0.0);
        assert!(rare_score > common_score);
    }

    #[test]
    fn test_bm25_zero_without_match() {
        let chunk = IndexedChunk::from_text("nothing relevant here");
        let terms = query_terms("invoice");
        let s = stats(&[&chunk], &terms);
        assert_eq!(Bm25::default().score(&terms, &chunk, &s), 0.0);
    }

    #[test]
    fn test_overlap_fraction() {
        let chunk = IndexedChunk::from_text("vacation policy for employees");
        let terms = query_terms("vacation policy contractors");
        let s = CorpusStats::default();
        let score = TermOverlap.score(&terms, &chunk, &s);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_scorer_from_config() {
        let mut config = lore_config::RetrievalConfig::default();
        assert_eq!(scorer_from_config(&config).unwrap().name(), "bm25");
        config.scorer = "overlap".to_string();
        assert_eq!(scorer_from_config(&config).unwrap().name(), "overlap");
        config.scorer = "vector".to_string();
        assert!(scorer_from_config(&config).is_err());
    }
}
