//! Configuration structures and loading.

use crate::error::{ConfigError, ConfigResult};
use crate::paths::AppPaths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub convert: ConvertConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> ConfigResult<Self> {
        let paths = AppPaths::new().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&paths.config_file)
    }

    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        self.validate()?;
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Create a default config file with comments. Refuses to overwrite.
    pub fn create_default_file(path: &Path) -> ConfigResult<()> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default_config_string())?;
        Ok(())
    }

    /// Resolve application paths, honouring `general.data_dir`.
    pub fn paths(&self) -> ConfigResult<AppPaths> {
        let paths = AppPaths::new().ok_or(ConfigError::NoConfigDir)?;
        Ok(match &self.general.data_dir {
            Some(dir) => paths.with_data_dir(dir),
            None => paths,
        })
    }

    /// Reject values that would make chunking or retrieval meaningless.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chunking.chunk_size < 64 {
            return Err(ConfigError::Invalid(format!(
                "chunking.chunk_size must be at least 64 bytes, got {}",
                self.chunking.chunk_size
            )));
        }
        if !(0.0..0.5).contains(&self.chunking.overlap_fraction) {
            return Err(ConfigError::Invalid(format!(
                "chunking.overlap_fraction must be in [0.0, 0.5), got {}",
                self.chunking.overlap_fraction
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be positive".to_string()));
        }
        if !matches!(self.retrieval.scorer.as_str(), "bm25" | "overlap") {
            return Err(ConfigError::Invalid(format!(
                "retrieval.scorer must be 'bm25' or 'overlap', got '{}'",
                self.retrieval.scorer
            )));
        }
        if !(self.retrieval.bm25_k1.is_finite() && self.retrieval.bm25_k1 >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.bm25_k1 must be a non-negative number, got {}",
                self.retrieval.bm25_k1
            )));
        }
        if !(0.0..=1.0).contains(&self.retrieval.bm25_b) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.bm25_b must be in [0.0, 1.0], got {}",
                self.retrieval.bm25_b
            )));
        }
        if self.sync.retry_failed_after_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "sync.retry_failed_after_seconds must be at most {} (one year), got {}",
                MAX_RETRY_DELAY_SECONDS, self.sync.retry_failed_after_seconds
            )));
        }
        if self.sync.max_retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "sync.max_retry_attempts must be at most {}, got {}",
                MAX_RETRY_ATTEMPTS, self.sync.max_retry_attempts
            )));
        }
        if self.sync.max_concurrent_conversions == 0 {
            return Err(ConfigError::Invalid(
                "sync.max_concurrent_conversions must be positive".to_string(),
            ));
        }
        if self.sync.expand_archives
            && (self.sync.archive_max_entries == 0 || self.sync.archive_max_entry_bytes == 0)
        {
            return Err(ConfigError::Invalid(
                "sync.archive_max_entries and sync.archive_max_entry_bytes must be positive"
                    .to_string(),
            ));
        }
        if self.convert.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("convert.timeout_seconds must be positive".to_string()));
        }
        Ok(())
    }

    /// Generate a default config file with helpful comments.
    pub fn default_config_string() -> String {
        r#"# Lore Configuration
# Knowledge base ingestion and retrieval

[general]
# Data directory for the database
# data_dir = "~/.local/share/lore"

[convert]
# Per-item conversion deadline (seconds)
timeout_seconds = 120

# Canonical text beyond this size is cut and the document marked partial
max_document_bytes = 256000

# External converter backends
pandoc_enabled = true
ocr_enabled = true
ocr_languages = "eng+rus"
transcribe = true

# Whisper model size: tiny, base, small, medium, large
whisper_model = "base"

[chunking]
# Maximum chunk size in bytes
chunk_size = 4096

# Overlap between consecutive chunks as a fraction of chunk_size
overlap_fraction = 0.0625

[retrieval]
# Scoring function: bm25 or overlap
scorer = "bm25"
top_k = 5
query_timeout_ms = 2000
bm25_k1 = 1.2
bm25_b = 0.75

[sync]
max_concurrent_conversions = 4

# Failed conversions are retried after this many seconds times the attempt count
retry_failed_after_seconds = 3600
max_retry_attempts = 5

# File patterns skipped by folder sources
ignore_patterns = [
    "*.tmp",
    "*.temp",
    ".DS_Store",
    "._*",
    "*.part",
    "~$*",
]

# Entries of .zip files become items named like "bundle.zip!/docs/a.md".
# Entries beyond the count limit and entries larger than the size limit are skipped.
expand_archives = true
archive_max_entries = 1000
archive_max_entry_bytes = 67108864

[store]
# Keep superseded documents instead of purging them after each sync
retain_history = false
"#
        .to_string()
    }
}

/// Upper bound for `sync.retry_failed_after_seconds`.
pub const MAX_RETRY_DELAY_SECONDS: u64 = 365 * 24 * 3600;

/// Upper bound for `sync.max_retry_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 1000;

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub data_dir: Option<String>,
}

/// Converter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub timeout_seconds: u64,
    pub max_document_bytes: usize,
    pub pandoc_enabled: bool,
    pub ocr_enabled: bool,
    pub ocr_languages: String,
    pub transcribe: bool,
    pub whisper_model: String,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            max_document_bytes: 256_000,
            pandoc_enabled: true,
            ocr_enabled: true,
            ocr_languages: "eng+rus".to_string(),
            transcribe: true,
            whisper_model: "base".to_string(),
        }
    }
}

/// Chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap_fraction: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            overlap_fraction: 0.0625,
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub scorer: String,
    pub top_k: usize,
    pub query_timeout_ms: u64,
    pub bm25_k1: f64,
    pub bm25_b: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            scorer: "bm25".to_string(),
            top_k: 5,
            query_timeout_ms: 2000,
            bm25_k1: 1.2,
            bm25_b: 0.75,
        }
    }
}

/// Sync pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_concurrent_conversions: usize,
    pub retry_failed_after_seconds: u64,
    pub max_retry_attempts: u32,
    pub ignore_patterns: Vec<String>,
    /// List the entries of `.zip` files as items of their own.
    pub expand_archives: bool,
    pub archive_max_entries: usize,
    pub archive_max_entry_bytes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_conversions: 4,
            retry_failed_after_seconds: 3600,
            max_retry_attempts: 5,
            ignore_patterns: vec![
                "*.tmp".to_string(),
                "*.temp".to_string(),
                ".DS_Store".to_string(),
                "._*".to_string(),
                "*.part".to_string(),
                "~$*".to_string(),
            ],
            expand_archives: true,
            archive_max_entries: 1000,
            archive_max_entry_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Content store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub retain_history: bool,
}
