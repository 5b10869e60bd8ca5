//! ZIP archives expanded into the items they contain.
//!
//! An entry is addressed as `<archive origin>!/<entry path>`, so
//! `bundle.zip!/docs/a.md` goes through the signature table as a Markdown
//! file. Nested archives are not opened.

use crate::error::{IngestError, IngestResult};
use lore_config::SyncConfig;
use std::io::{Read, Seek};
use std::path::{Component, Path};
use tracing::warn;

/// Separates the archive origin from the entry path.
pub const ENTRY_SEPARATOR: &str = "!/";

/// Caps applied to every archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Entries past this count are skipped.
    pub max_entries: usize,
    /// Entries that decompress beyond this many bytes are skipped.
    pub max_entry_bytes: u64,
}

impl ArchiveLimits {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_entries: config.archive_max_entries,
            max_entry_bytes: config.archive_max_entry_bytes,
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArchiveEntry {
    pub path: String,
    pub size: u64,
}

pub(crate) fn is_archive(origin_id: &str) -> bool {
    origin_id.to_ascii_lowercase().ends_with(".zip")
}

pub(crate) fn entry_origin(archive_origin: &str, entry_path: &str) -> String {
    format!("{}{}{}", archive_origin, ENTRY_SEPARATOR, entry_path)
}

/// Split `bundle.zip!/docs/a.md` into `("bundle.zip", "docs/a.md")`.
pub(crate) fn split_origin(origin_id: &str) -> Option<(&str, &str)> {
    let (archive, entry) = origin_id.split_once(ENTRY_SEPARATOR)?;
    (is_archive(archive) && !entry.is_empty()).then_some((archive, entry))
}

/// List the files of an archive, in archive order, within the limits.
pub(crate) fn list_entries<R: Read + Seek>(
    reader: R,
    origin_id: &str,
    limits: ArchiveLimits,
) -> IngestResult<Vec<ArchiveEntry>> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| IngestError::unavailable(origin_id, e))?;

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| IngestError::unavailable(origin_id, e))?;
        if file.is_dir() {
            continue;
        }
        let Some(path) = file.enclosed_name().as_ref().and_then(|p| entry_path(p.as_ref())) else {
            warn!("Skipping unsafe entry {:?} in {}", file.name(), origin_id);
            continue;
        };
        if path.split('/').any(|part| part.starts_with('.') || part == "__MACOSX") {
            continue;
        }
        if file.size() > limits.max_entry_bytes {
            warn!(
                "Skipping {}: {} bytes exceeds the archive entry limit of {}",
                entry_origin(origin_id, &path),
                file.size(),
                limits.max_entry_bytes
            );
            continue;
        }
        if entries.len() == limits.max_entries {
            warn!(
                "{} has more than {} entries, the rest are skipped",
                origin_id, limits.max_entries
            );
            break;
        }
        entries.push(ArchiveEntry {
            path,
            size: file.size(),
        });
    }
    Ok(entries)
}

/// Read one entry, refusing entries that decompress past the size limit.
pub(crate) fn read_entry<R: Read + Seek>(
    reader: R,
    origin_id: &str,
    entry: &str,
    limits: ArchiveLimits,
) -> IngestResult<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| IngestError::unavailable(origin_id, e))?;

    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| IngestError::unavailable(origin_id, e))?;
        let matches = file
            .enclosed_name()
            .as_ref()
            .and_then(|p| entry_path(p.as_ref()))
            .is_some_and(|p| p == entry);
        if !matches || file.is_dir() {
            continue;
        }

        let mut out = Vec::new();
        file.take(limits.max_entry_bytes.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| IngestError::unavailable(entry_origin(origin_id, entry), e))?;
        if out.len() as u64 > limits.max_entry_bytes {
            return Err(IngestError::unavailable(
                entry_origin(origin_id, entry),
                "entry exceeds the archive size limit",
            ));
        }
        return Ok(out);
    }

    Err(IngestError::unavailable(
        entry_origin(origin_id, entry),
        "no such archive entry",
    ))
}

fn entry_path(path: &Path) -> Option<String> {
    let parts = path
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}
