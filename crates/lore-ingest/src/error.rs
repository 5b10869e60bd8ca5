//! Error types for conversion and sync.

use thiserror::Error;

/// Result type for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors that can occur while listing, fetching or storing source items.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] lore_db::DbError),

    #[error("Config error: {0}")]
    Config(#[from] lore_config::ConfigError),

    #[error("Source unavailable ({origin}): {reason}")]
    SourceUnavailable { origin: String, reason: String },

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl IngestError {
    pub fn unavailable(origin: impl Into<String>, reason: impl ToString) -> Self {
        IngestError::SourceUnavailable {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<IngestError> for lore_core::Error {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::SourceUnavailable { origin, reason } => {
                lore_core::Error::SourceUnavailable { origin, reason }
            }
            IngestError::Io(e) => lore_core::Error::Io(e),
            IngestError::Database(e) => e.into(),
            IngestError::Config(e) => lore_core::Error::Config(e.to_string()),
            IngestError::InvalidPattern { .. } => lore_core::Error::Config(err.to_string()),
        }
    }
}

/// Errors reported by a converter backend.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Process(#[from] lore_process::ProcessError),
}

impl ConvertError {
    pub fn failed(reason: impl ToString) -> Self {
        ConvertError::Failed(reason.to_string())
    }
}

impl From<zip::result::ZipError> for ConvertError {
    fn from(err: zip::result::ZipError) -> Self {
        ConvertError::Failed(format!("invalid archive: {}", err))
    }
}

impl From<quick_xml::Error> for ConvertError {
    fn from(err: quick_xml::Error) -> Self {
        ConvertError::Failed(format!("invalid XML: {}", err))
    }
}
