//! Lore Ingest - Conversion, incremental sync and retrieval for Lore.
//!
//! This crate provides:
//! - Converter backends selected by an explicit signature table
//! - Normalisation of converted text into documents
//! - Folder and in-memory sources, with ZIP archives expanded into entries
//! - Delta computation and atomic sync passes
//! - The access-checked query engine

mod archive;
pub mod converters;
mod engine;
mod error;
mod knowledge_base;
mod normalizer;
mod source;
mod store;
mod sync;

pub use archive::{ArchiveLimits, ENTRY_SEPARATOR};
pub use converters::{Capability, Converted, Converter, ConverterRegistry};
pub use engine::{Engine, ItemFailure, Passage, QueryResult, SyncReport};
pub use error::{ConvertError, IngestError, IngestResult};
pub use knowledge_base::{validate_name, KnowledgeBaseRegistry};
pub use normalizer::Normalizer;
pub use source::{FolderSource, MemorySource, SourceProvider};
pub use store::ContentStore;
pub use sync::{compute_delta, RetryPolicy};
