//! Word processing documents.
//!
//! `.docx` is read directly from its XML; other formats go through pandoc.

use super::xml::{attr, open_archive, read_part, reader};
use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;
use quick_xml::events::Event;

#[derive(Debug, Clone, Copy)]
pub struct OfficeConverter {
    pandoc_enabled: bool,
}

impl OfficeConverter {
    pub fn new(pandoc_enabled: bool) -> Self {
        Self { pandoc_enabled }
    }
}

#[async_trait]
impl Converter for OfficeConverter {
    fn capability(&self) -> Capability {
        Capability::OfficeDocument
    }

    async fn convert(
        &self,
        bytes: &[u8],
        signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        let extension = signature.extension.as_deref().unwrap_or("docx");
        if extension == "docx" {
            let doc = docx_to_markdown(bytes)?;
            let mut converted = Converted::new(doc.text).with_meta("paragraphs", doc.paragraphs);
            if let Some(title) = doc.title {
                converted = converted.with_title(title);
            }
            return Ok(converted);
        }

        if !self.pandoc_enabled {
            return Err(ConvertError::Unsupported(format!(
                ".{} needs pandoc, which is disabled",
                extension
            )));
        }
        let text = lore_process::pandoc_to_markdown(bytes, extension).await?;
        Ok(Converted::new(text).with_meta("converter", "pandoc"))
    }
}

#[derive(Debug, Default)]
pub(crate) struct DocxText {
    pub text: String,
    pub title: Option<String>,
    pub paragraphs: usize,
}

pub(crate) fn docx_to_markdown(bytes: &[u8]) -> Result<DocxText, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_part(&mut archive, "word/document.xml")?;

    let mut out = DocxText::default();
    let mut reader = reader(&xml);
    let mut buf = Vec::new();

    let mut paragraph = String::new();
    let mut style: Option<String> = None;
    let mut listed = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => {
                    paragraph.clear();
                    style = None;
                    listed = false;
                }
                b"t" => in_text = true,
                b"pStyle" => style = attr(&e, b"val"),
                b"numPr" => listed = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"pStyle" => style = attr(&e, b"val"),
                b"numPr" => listed = true,
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                paragraph.push_str(&t.unescape()?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        push_paragraph(&mut out, text, style.as_deref(), listed);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn push_paragraph(out: &mut DocxText, text: &str, style: Option<&str>, listed: bool) {
    match style.and_then(heading_level) {
        Some(level) => {
            if level == 1 && out.title.is_none() {
                out.title = Some(text.to_string());
            }
            out.text.push_str(&"#".repeat(level));
            out.text.push(' ');
        }
        None if listed => out.text.push_str("- "),
        None => {}
    }
    out.text.push_str(text);
    out.text.push_str("\n\n");
    out.paragraphs += 1;
}

/// Markdown heading level for a paragraph style id such as `Heading2` or `Title`.
fn heading_level(style: &str) -> Option<usize> {
    let style: String = style
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if style == "title" {
        return Some(1);
    }
    let level: usize = style.strip_prefix("heading")?.parse().ok()?;
    Some(level.clamp(1, 6))
}
