//! Lore Index - In-memory retrieval over chunked documents.
//!
//! This crate provides:
//! - Structural chunking of canonical text into overlapping byte windows
//! - Tokenization with English and Russian stop words
//! - Pluggable scoring (BM25, term overlap)
//! - Per knowledge base generations, published atomically

mod chunker;
mod error;
mod index;
mod scorer;
mod tokenize;

pub use chunker::{ChunkConfig, Chunker};
pub use error::{IndexError, IndexResult};
pub use index::{Generation, GenerationBuilder, Index, IndexedChunk, QueryOutcome, ScoredChunk};
pub use scorer::{scorer_from_config, Bm25, CorpusStats, Scorer, TermOverlap};
pub use tokenize::{query_terms, tokenize};
