//! Byte sources for knowledge bases.

use crate::archive::{self, ArchiveLimits};
use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::Pattern;
use lore_core::{sha256_hex, SourceItem};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A folder-like collection of files.
///
/// Any failure of `list` or `fetch` aborts the current sync pass.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Human-readable location, for logs and reports.
    fn describe(&self) -> String;

    async fn list(&self) -> IngestResult<Vec<SourceItem>>;

    async fn fetch(&self, origin_id: &str) -> IngestResult<Vec<u8>>;
}

/// Files under a local directory.
///
/// Origin ids are paths relative to the root with `/` separators. Hidden
/// files and directories are skipped, as are paths matching an ignore pattern.
/// With archive expansion on, each `.zip` is replaced by its entries.
#[derive(Debug, Clone)]
pub struct FolderSource {
    root: PathBuf,
    ignore: Vec<Pattern>,
    archives: Option<ArchiveLimits>,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>, ignore_patterns: &[String]) -> IngestResult<Self> {
        let ignore = ignore_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| IngestError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<IngestResult<Vec<_>>>()?;
        Ok(Self {
            root: root.into(),
            ignore,
            archives: None,
        })
    }

    /// List entries of `.zip` files as `<archive>!/<entry>` items.
    pub fn with_archives(mut self, limits: ArchiveLimits) -> Self {
        self.archives = Some(limits);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_ignored(&self, relative: &str) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        self.ignore
            .iter()
            .any(|p| p.matches(name) || p.matches(relative))
    }

    fn scan(&self) -> IngestResult<Vec<SourceItem>> {
        if !self.root.is_dir() {
            return Err(IngestError::unavailable(
                self.root.display().to_string(),
                "not a directory",
            ));
        }

        let mut items = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let origin = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| self.root.display().to_string());
                IngestError::unavailable(origin, e)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_origin(&self.root, entry.path()) else {
                warn!("Skipping non UTF-8 path {:?}", entry.path());
                continue;
            };
            if self.is_ignored(&relative) {
                debug!("Ignoring {}", relative);
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| IngestError::unavailable(&relative, e))?;
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .map_err(|e| IngestError::unavailable(&relative, e))?;

            if let Some(limits) = self.archives.filter(|_| archive::is_archive(&relative)) {
                match self.archive_items(entry.path(), &relative, modified, limits) {
                    Ok(children) => {
                        items.extend(children);
                        continue;
                    }
                    // Listed as a plain file, so the failure shows up as a document
                    Err(e) => warn!("Cannot expand {}: {}", relative, e),
                }
            }
            items.push(SourceItem::new(relative, metadata.len(), modified));
        }

        Ok(items)
    }

    /// Entries share the archive's modification time.
    fn archive_items(
        &self,
        path: &Path,
        relative: &str,
        modified: DateTime<Utc>,
        limits: ArchiveLimits,
    ) -> IngestResult<Vec<SourceItem>> {
        let file = std::fs::File::open(path).map_err(|e| IngestError::unavailable(relative, e))?;
        let entries = archive::list_entries(file, relative, limits)?;
        Ok(entries
            .into_iter()
            .map(|entry| (archive::entry_origin(relative, &entry.path), entry.size))
            .filter(|(origin, _)| {
                let ignored = self.is_ignored(origin);
                if ignored {
                    debug!("Ignoring {}", origin);
                }
                !ignored
            })
            .map(|(origin, size)| SourceItem::new(origin, size, modified))
            .collect())
    }

    fn resolve(&self, origin_id: &str) -> IngestResult<PathBuf> {
        let relative = Path::new(origin_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || origin_id.is_empty() {
            return Err(IngestError::unavailable(origin_id, "origin outside source root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl SourceProvider for FolderSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self) -> IngestResult<Vec<SourceItem>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.scan())
            .await
            .map_err(|e| IngestError::unavailable(self.describe(), e))?
    }

    async fn fetch(&self, origin_id: &str) -> IngestResult<Vec<u8>> {
        if let Some(limits) = self.archives {
            if let Some((archive_origin, entry)) = archive::split_origin(origin_id) {
                let path = self.resolve(archive_origin)?;
                let (archive_origin, entry) = (archive_origin.to_string(), entry.to_string());
                return tokio::task::spawn_blocking(move || {
                    let file = std::fs::File::open(&path)
                        .map_err(|e| IngestError::unavailable(&archive_origin, e))?;
                    archive::read_entry(file, &archive_origin, &entry, limits)
                })
                .await
                .map_err(|e| IngestError::unavailable(origin_id, e))?;
            }
        }

        let path = self.resolve(origin_id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| IngestError::unavailable(origin_id, e))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

fn relative_origin(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// An in-memory source, for embedding and tests.
///
/// Items carry a declared content hash, so proxies track content exactly.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: Arc<RwLock<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, origin_id: &str, bytes: impl Into<Vec<u8>>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(origin_id.to_string(), (bytes.into(), Utc::now()));
    }

    pub fn remove(&self, origin_id: &str) -> bool {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.remove(origin_id).is_some()
    }
}

#[async_trait]
impl SourceProvider for MemorySource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn list(&self) -> IngestResult<Vec<SourceItem>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files
            .iter()
            .map(|(origin, (bytes, modified))| {
                SourceItem::new(origin.clone(), bytes.len() as u64, *modified)
                    .with_content_hash(sha256_hex(bytes))
            })
            .collect())
    }

    async fn fetch(&self, origin_id: &str) -> IngestResult<Vec<u8>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(origin_id)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| IngestError::unavailable(origin_id, "no such item"))
    }
}
