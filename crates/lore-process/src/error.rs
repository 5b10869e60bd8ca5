//! Error types for external tool processing.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for processing operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that can occur while running external converters.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Tool not found: {tool}. Please install it.")]
    ToolNotFound { tool: String },

    #[error("Transcription error: {0}")]
    TranscriptionError(String),

    #[error("OCR error: {0}")]
    OcrError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{tool} failed with exit code {code}: {stderr}")]
    ProcessFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Parse error: {0}")]
    ParseError(String),
}
