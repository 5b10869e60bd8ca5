//! Spreadsheets rendered as Markdown tables.

use super::encoding::decode_text;
use super::xml::{attr, has_part, numbered_parts, open_archive, read_part, reader, Archive};
use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;
use quick_xml::events::Event;
use std::collections::HashMap;

/// Limit on cells read per sheet.
const MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetConverter;

#[async_trait]
impl Converter for SpreadsheetConverter {
    fn capability(&self) -> Capability {
        Capability::Spreadsheet
    }

    async fn convert(
        &self,
        bytes: &[u8],
        signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        match signature.extension.as_deref() {
            Some("tsv") => Ok(delimited(bytes, '\t')),
            Some("xlsx") => {
                let sheets = xlsx_sheets(bytes)?;
                let mut text = String::new();
                for (name, rows) in &sheets {
                    text.push_str(&format!("## {}\n\n", name));
                    text.push_str(&markdown_table(rows));
                    text.push('\n');
                }
                Ok(Converted::new(text).with_meta("sheets", sheets.len()))
            }
            // CSV is also the fallback for spreadsheet MIME types without an extension
            _ => Ok(delimited(bytes, ',')),
        }
    }
}

fn delimited(bytes: &[u8], delimiter: char) -> Converted {
    let decoded = decode_text(bytes);
    let rows = parse_delimited(&decoded.text, delimiter);
    decoded.annotate(Converted::new(markdown_table(&rows)).with_meta("rows", rows.len()))
}

/// Split delimited text into rows, honouring double-quoted fields.
pub(crate) fn parse_delimited(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            c if c == delimiter => row.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows.retain(|r| r.iter().any(|f| !f.trim().is_empty()));
    rows
}

/// Render rows as a Markdown table; the first row is the header.
pub(crate) fn markdown_table(rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let render = |row: &[String]| {
        let cells: Vec<String> = (0..width)
            .map(|i| {
                row.get(i)
                    .map(|c| c.trim().replace('|', "\\|").replace('\n', " "))
                    .unwrap_or_default()
            })
            .collect();
        format!("| {} |\n", cells.join(" | "))
    };

    let mut out = render(&rows[0]);
    out.push_str(&format!("|{}\n", " --- |".repeat(width)));
    for row in &rows[1..] {
        out.push_str(&render(row));
    }
    out
}

/// Sheets of a workbook as `(name, rows)`, in workbook order.
pub(crate) fn xlsx_sheets(bytes: &[u8]) -> Result<Vec<(String, Vec<Vec<String>>)>, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let shared = if has_part(&archive, "xl/sharedStrings.xml") {
        shared_strings(&read_part(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for (name, part) in sheet_parts(&mut archive)? {
        let rows = sheet_rows(&read_part(&mut archive, &part)?, &shared)?;
        if !rows.is_empty() {
            sheets.push((name, rows));
        }
    }
    Ok(sheets)
}

/// Sheet names and part paths from the workbook and its relationships.
fn sheet_parts(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ConvertError> {
    if !has_part(archive, "xl/workbook.xml") || !has_part(archive, "xl/_rels/workbook.xml.rels") {
        return Ok(numbered_sheets(archive));
    }

    let mut targets = HashMap::new();
    let rels = read_part(archive, "xl/_rels/workbook.xml.rels")?;
    let mut r = reader(&rels);
    let mut buf = Vec::new();
    loop {
        match r.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    let target = target.trim_start_matches('/');
                    let path = if target.starts_with("xl/") {
                        target.to_string()
                    } else {
                        format!("xl/{}", target)
                    };
                    targets.insert(id, path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut sheets = Vec::new();
    let workbook = read_part(archive, "xl/workbook.xml")?;
    let mut r = reader(&workbook);
    loop {
        match r.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name");
                let part = attr(&e, b"id").and_then(|id| targets.get(&id).cloned());
                if let (Some(name), Some(part)) = (name, part) {
                    sheets.push((name, part));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if sheets.is_empty() {
        return Ok(numbered_sheets(archive));
    }
    Ok(sheets)
}

fn numbered_sheets(archive: &Archive<'_>) -> Vec<(String, String)> {
    numbered_parts(archive, "xl/worksheets/sheet", ".xml")
        .into_iter()
        .enumerate()
        .map(|(i, part)| (format!("Sheet{}", i + 1), part))
        .collect()
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ConvertError> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut r = reader(xml);
    let mut buf = Vec::new();

    loop {
        match r.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column of a cell reference such as `C12`.
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let n = letters
        .to_ascii_uppercase()
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
    Some(n - 1)
}

fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<String>>, ConvertError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut column = 0usize;
    let mut kind: Option<String> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut cells = 0usize;
    let mut r = reader(xml);
    let mut buf = Vec::new();

    loop {
        match r.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    column = 0;
                }
                b"c" => {
                    column = attr(&e, b"r").and_then(|r| column_index(&r)).unwrap_or(column);
                    kind = attr(&e, b"t");
                    value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Text(t) if in_value => value.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let text = match kind.as_deref() {
                        Some("s") => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                            .unwrap_or_default(),
                        Some("b") => (if value.trim() == "1" { "TRUE" } else { "FALSE" }).to_string(),
                        _ => value.clone(),
                    };
                    if row.len() <= column {
                        row.resize(column + 1, String::new());
                    }
                    row[column] = text;
                    column += 1;
                    cells += 1;
                }
                b"row" => {
                    if row.iter().any(|c| !c.trim().is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
        if cells >= MAX_CELLS_PER_SHEET {
            break;
        }
    }
    Ok(rows)
}
