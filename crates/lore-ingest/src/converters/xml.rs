//! Helpers for OOXML containers (ZIP archives of XML parts).

use crate::error::ConvertError;
use quick_xml::events::BytesStart;
use std::io::{Cursor, Read};

/// Upper bound on one decompressed XML part.
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;

pub(crate) type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

pub(crate) fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ConvertError> {
    Ok(zip::ZipArchive::new(Cursor::new(bytes))?)
}

/// Read one part, refusing parts larger than the bound.
pub(crate) fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ConvertError> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry
        .take(MAX_PART_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ConvertError::failed(format!("reading {}: {}", name, e)))?;
    if out.len() as u64 >= MAX_PART_BYTES {
        return Err(ConvertError::failed(format!("{} exceeds size limit", name)));
    }
    Ok(out)
}

pub(crate) fn has_part(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

/// Parts named `<prefix><N><suffix>`, ordered by N.
pub(crate) fn numbered_parts(archive: &Archive<'_>, prefix: &str, suffix: &str) -> Vec<String> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(suffix)?.parse().ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, name)| name).collect()
}

/// Value of the attribute with the given local name.
pub(crate) fn attr(element: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

pub(crate) fn reader(xml: &[u8]) -> quick_xml::Reader<&[u8]> {
    // Whitespace inside text runs is significant
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    reader
}
