//! PDF text extraction.

use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;
use tracing::debug;

/// Extracts text in-process on a blocking thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfConverter;

#[async_trait]
impl Converter for PdfConverter {
    fn capability(&self) -> Capability {
        Capability::Pdf
    }

    async fn convert(
        &self,
        bytes: &[u8],
        _signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        let owned = bytes.to_vec();
        // The extractor can panic on malformed files; the join error carries it
        let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned))
            .await
            .map_err(|e| ConvertError::failed(format!("PDF extractor crashed: {}", e)))?
            .map_err(|e| ConvertError::failed(format!("Failed to extract text from PDF: {}", e)))?;

        let pages = split_pages(&raw);
        debug!("Extracted {} characters over {} pages", raw.len(), pages.len());

        Ok(Converted::new(render_pages(&pages)).with_meta("pages", pages.len()))
    }
}

/// Split extracted text at form feeds, tidying each page.
fn split_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text.split('\x0C').map(clean_page).collect();
    // A trailing form feed leaves an empty last page
    match pages.iter().rposition(|p| !p.is_empty()) {
        Some(last) => pages.into_iter().take(last + 1).collect(),
        None => Vec::new(),
    }
}

fn clean_page(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .fold(Vec::new(), |mut acc: Vec<&str>, line| {
            let last_was_empty = acc.last().map(|s| s.is_empty()).unwrap_or(true);
            if !(line.is_empty() && last_was_empty) {
                acc.push(line);
            }
            acc
        })
        .join("\n")
        .trim()
        .to_string()
}

/// Multi-page documents get one `## Page N` section per page.
fn render_pages(pages: &[String]) -> String {
    if pages.len() <= 1 {
        return pages.first().cloned().unwrap_or_default();
    }
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        out.push_str(&format!("## Page {}\n\n", i + 1));
        if !page.is_empty() {
            out.push_str(page);
            out.push_str("\n\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pages() {
        let pages = split_pages("  Intro  \n\n\n\nline two\x0CSecond page\x0C");
        assert_eq!(pages, vec!["Intro\n\nline two".to_string(), "Second page".to_string()]);
    }

    #[test]
    fn test_render_pages() {
        assert_eq!(render_pages(&["only".to_string()]), "only");
        assert_eq!(
            render_pages(&["a".to_string(), "b".to_string()]),
            "## Page 1\n\na\n\n## Page 2\n\nb\n\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_pdf_fails() {
        let result = PdfConverter
            .convert(b"not a pdf", &TypeSignature::from_origin("a.pdf"))
            .await;
        assert!(matches!(result, Err(ConvertError::Failed(_))));
    }
}
