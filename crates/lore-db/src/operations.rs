//! Database CRUD operations.

pub mod chunks;
pub mod documents;
pub mod knowledge_bases;
pub mod stats;
pub mod sync_state;

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 column, falling back to now for corrupt values.
pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Report an unknown enum string stored in a column as a conversion failure.
pub(crate) fn bad_column(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}
