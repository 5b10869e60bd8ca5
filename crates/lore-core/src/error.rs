//! Error types for Lore.

use thiserror::Error;

/// Core error type for Lore operations.
///
/// The first five variants form the failure taxonomy surfaced to callers of
/// the engine; every one of them names the origin it concerns.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Source unavailable ({origin}): {reason}")]
    SourceUnavailable { origin: String, reason: String },

    #[error("Conversion failed for {origin}: {reason}")]
    ConversionFailed { origin: String, reason: String },

    #[error("Principal '{principal}' is not authorized to {action} knowledge base '{kb}'")]
    Unauthorized {
        principal: String,
        action: String,
        kb: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {seconds}s: {origin}")]
    Timeout { origin: String, seconds: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SourceUnavailable { .. } => "source_unavailable",
            Error::ConversionFailed { .. } => "conversion_failed",
            Error::Unauthorized { .. } => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::Timeout { .. } => "timeout",
            Error::Database(_) => "database",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::InvalidInput(_) => "invalid_input",
            Error::InvalidState(_) => "invalid_state",
            Error::Other(_) => "other",
        }
    }

    /// Whether the same pass may succeed later without anyone changing
    /// configuration or permissions.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. } | Error::Timeout { .. } | Error::Io(_) | Error::Database(_)
        )
    }

    pub fn unauthorized(principal: &str, action: &str, kb: &str) -> Self {
        Error::Unauthorized {
            principal: principal.to_string(),
            action: action.to_string(),
            kb: kb.to_string(),
        }
    }
}

/// Result type alias using Lore's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_and_message() {
        let err = Error::Timeout {
            origin: "docs/a.pdf".to_string(),
            seconds: 30,
        };
        assert_eq!(err.kind(), "timeout");
        assert!(err.to_string().contains("docs/a.pdf"));

        let err = Error::unauthorized("bob", "read", "handbook");
        assert_eq!(err.kind(), "unauthorized");
        assert!(err.to_string().contains("bob"));
        assert!(err.to_string().contains("handbook"));
    }

    #[test]
    fn test_transient_errors() {
        let unavailable = Error::SourceUnavailable {
            origin: "/mnt/share".to_string(),
            reason: "not mounted".to_string(),
        };
        assert!(unavailable.is_transient());
        assert!(Error::Io(std::io::Error::other("disk busy")).is_transient());

        assert!(!Error::unauthorized("bob", "sync", "handbook").is_transient());
        assert!(!Error::NotFound("Knowledge base not found: handbook".to_string()).is_transient());
        assert!(!Error::Config("bad".to_string()).is_transient());
    }
}
