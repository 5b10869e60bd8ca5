//! Error types for indexing.

use thiserror::Error;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid chunking configuration: {0}")]
    InvalidChunkConfig(String),

    #[error("Unknown scorer: {0}")]
    UnknownScorer(String),
}

impl From<IndexError> for lore_core::Error {
    fn from(err: IndexError) -> Self {
        lore_core::Error::Config(err.to_string())
    }
}
