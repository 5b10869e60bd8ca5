//! Core domain types for Lore.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

use crate::access::{AccessPolicy, KnowledgeBaseState};

/// Unique identifier for knowledge bases.
pub type KbId = String;

/// Identifier of a user or agent.
pub type PrincipalId = String;

/// Generate a new unique ID.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Raw type signature of a source item: extension and/or MIME type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSignature {
    pub extension: Option<String>,
    pub mime: Option<String>,
}

impl TypeSignature {
    /// Derive the signature from an origin path's extension.
    pub fn from_origin(origin_id: &str) -> Self {
        let extension = Path::new(origin_id)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        Self {
            extension,
            mime: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into().to_lowercase());
        self
    }
}

impl std::fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.extension, &self.mime) {
            (Some(ext), Some(mime)) => write!(f, ".{} ({})", ext, mime),
            (Some(ext), None) => write!(f, ".{}", ext),
            (None, Some(mime)) => write!(f, "{}", mime),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

/// Cheap change marker for a source item.
///
/// Persisted as `sha256:<hex>` or `sm:<size>:<unix-seconds>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FingerprintProxy {
    ContentHash(String),
    SizeMtime { size: u64, modified: i64 },
}

impl FingerprintProxy {
    pub fn as_string(&self) -> String {
        match self {
            FingerprintProxy::ContentHash(hash) => format!("sha256:{}", hash),
            FingerprintProxy::SizeMtime { size, modified } => format!("sm:{}:{}", size, modified),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if let Some(hash) = s.strip_prefix("sha256:") {
            return Some(FingerprintProxy::ContentHash(hash.to_string()));
        }
        let rest = s.strip_prefix("sm:")?;
        let (size, modified) = rest.split_once(':')?;
        Some(FingerprintProxy::SizeMtime {
            size: size.parse().ok()?,
            modified: modified.parse().ok()?,
        })
    }
}

impl std::fmt::Display for FingerprintProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

/// One file as seen at its origin during a sync pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub origin_id: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub signature: TypeSignature,
    /// Content hash declared by the source, when it provides one.
    pub content_hash: Option<String>,
}

impl SourceItem {
    pub fn new(origin_id: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        let origin_id = origin_id.into();
        Self {
            signature: TypeSignature::from_origin(&origin_id),
            origin_id,
            modified,
            size,
            content_hash: None,
        }
    }

    /// Build an item from a unix timestamp (seconds).
    pub fn at_unix(origin_id: impl Into<String>, size: u64, modified_secs: i64) -> Self {
        let modified = Utc
            .timestamp_opt(modified_secs, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(origin_id, size, modified)
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// The declared content hash when present, otherwise size plus mtime.
    pub fn proxy(&self) -> FingerprintProxy {
        match &self.content_hash {
            Some(hash) => FingerprintProxy::ContentHash(hash.clone()),
            None => FingerprintProxy::SizeMtime {
                size: self.size,
                modified: self.modified.timestamp(),
            },
        }
    }
}

/// Reference to a source item within a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub kb_id: KbId,
    pub origin_id: String,
}

impl SourceRef {
    pub fn new(kb_id: impl Into<String>, origin_id: impl Into<String>) -> Self {
        Self {
            kb_id: kb_id.into(),
            origin_id: origin_id.into(),
        }
    }
}

/// Deterministic identity of a (source, content) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the source identity and the content separately, then hash both digests.
    pub fn compute(kb_id: &str, origin_id: &str, content: &[u8]) -> Self {
        let source = Sha256::digest(format!("{}/{}", kb_id, origin_id).as_bytes());
        let body = Sha256::digest(content);
        let mut hasher = Sha256::new();
        hasher.update(source);
        hasher.update(body);
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of converting a source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Ok,
    Partial,
    Failed,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Ok => "ok",
            ConversionStatus::Partial => "partial",
            ConversionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ok" => Some(ConversionStatus::Ok),
            "partial" => Some(ConversionStatus::Partial),
            "failed" => Some(ConversionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a conversion produced no usable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// No converter is mapped for the type signature.
    Unsupported,
    /// The backend reported an error.
    Conversion,
    /// The backend did not finish within the configured time.
    Timeout,
    /// The backend succeeded but produced no text.
    Empty,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Unsupported => "unsupported",
            FailureKind::Conversion => "conversion",
            FailureKind::Timeout => "timeout",
            FailureKind::Empty => "empty",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unsupported" => Some(FailureKind::Unsupported),
            "conversion" => Some(FailureKind::Conversion),
            "timeout" => Some(FailureKind::Timeout),
            "empty" => Some(FailureKind::Empty),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure detail attached to a failed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl ConversionFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ConversionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Structural boundary inside a document's canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Heading depth, 1 for top-level.
    pub level: u8,
    /// Byte offset into the canonical text.
    pub offset: usize,
}

impl Section {
    pub fn new(title: impl Into<String>, level: u8, offset: usize) -> Self {
        Self {
            title: title.into(),
            level,
            offset,
        }
    }
}

/// Normalised result of converting one source item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub fingerprint: Fingerprint,
    pub kb_id: KbId,
    pub origin_id: String,
    pub status: ConversionStatus,
    pub capability: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub sections: Vec<Section>,
    pub failure: Option<ConversionFailure>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        fingerprint: Fingerprint,
        source: &SourceRef,
        text: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint,
            kb_id: source.kb_id.clone(),
            origin_id: source.origin_id.clone(),
            status: ConversionStatus::Ok,
            capability: None,
            title: None,
            text: text.into(),
            sections: Vec::new(),
            failure: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    /// A document recording a failed conversion. It carries no text.
    pub fn failed(fingerprint: Fingerprint, source: &SourceRef, failure: ConversionFailure) -> Self {
        let mut doc = Self::new(fingerprint, source, "");
        doc.status = ConversionStatus::Failed;
        doc.failure = Some(failure);
        doc
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_sections(mut self, sections: Vec<Section>) -> Self {
        self.sections = sections;
        self
    }

    pub fn with_status(mut self, status: ConversionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef::new(&self.kb_id, &self.origin_id)
    }

    pub fn is_failed(&self) -> bool {
        self.status == ConversionStatus::Failed
    }
}

/// Structural weight of a chunk, used to break score ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPriority {
    Body = 0,
    Heading = 1,
    Title = 2,
}

impl ChunkPriority {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            2 => ChunkPriority::Title,
            1 => ChunkPriority::Heading,
            _ => ChunkPriority::Body,
        }
    }
}

/// A bounded slice of a document's canonical text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub fingerprint: Fingerprint,
    pub kb_id: KbId,
    pub origin_id: String,
    pub chunk_index: u32,
    /// Start byte offset into the parent text (inclusive).
    pub start: usize,
    /// End byte offset into the parent text (exclusive).
    pub end: usize,
    pub priority: ChunkPriority,
    pub text: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Version and time of the last completed sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub version: u64,
    pub synced_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn first() -> Self {
        Self {
            version: 1,
            synced_at: Utc::now(),
        }
    }

    pub fn advance(previous: Option<&SyncCursor>) -> Self {
        Self {
            version: previous.map(|c| c.version + 1).unwrap_or(1),
            synced_at: Utc::now(),
        }
    }
}

/// A named, access-controlled collection of documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: KbId,
    pub name: String,
    pub policy: AccessPolicy,
    pub state: KnowledgeBaseState,
    pub cursor: Option<SyncCursor>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            policy: AccessPolicy::new(owner),
            state: KnowledgeBaseState::Empty,
            cursor: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-origin entry of the recorded map kept between sync passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub origin_id: String,
    pub proxy: FingerprintProxy,
    pub fingerprint: Fingerprint,
    pub status: ConversionStatus,
    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
}

impl SyncRecord {
    pub fn new(
        origin_id: impl Into<String>,
        proxy: FingerprintProxy,
        fingerprint: Fingerprint,
        status: ConversionStatus,
    ) -> Self {
        Self {
            origin_id: origin_id.into(),
            proxy,
            fingerprint,
            status,
            attempts: 1,
            last_attempt_at: Utc::now(),
        }
    }
}

/// Classification of a listing against the recorded map.
#[derive(Debug, Clone, Default)]
pub struct SyncDelta {
    pub added: Vec<SourceItem>,
    pub updated: Vec<SourceItem>,
    /// Origins recorded previously but absent from the listing.
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Unchanged items whose earlier conversion failed and are due again.
    pub retry: Vec<SourceItem>,
}

impl SyncDelta {
    /// Items that need fetching and conversion in this pass.
    pub fn pending(&self) -> impl Iterator<Item = &SourceItem> {
        self.added
            .iter()
            .chain(self.updated.iter())
            .chain(self.retry.iter())
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.retry.is_empty()
    }
}
