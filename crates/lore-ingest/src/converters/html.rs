//! HTML to Markdown-like text through a DOM walk.

use super::encoding::decode_text;
use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;
use scraper::{ElementRef, Html, Selector};

const BLOCKS: &str = "h1, h2, h3, h4, h5, h6, p, li, pre, blockquote, td, th, dt, dd";

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlConverter;

#[async_trait]
impl Converter for HtmlConverter {
    fn capability(&self) -> Capability {
        Capability::Html
    }

    async fn convert(
        &self,
        bytes: &[u8],
        _signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        let decoded = decode_text(bytes);
        let (text, title) = html_to_markdown(&decoded.text)?;

        let mut converted = decoded.annotate(Converted::new(text));
        if let Some(title) = title {
            converted = converted.with_title(title);
        }
        Ok(converted)
    }
}

fn selector(css: &str) -> Result<Selector, ConvertError> {
    Selector::parse(css).map_err(|e| ConvertError::failed(format!("bad selector {}: {}", css, e)))
}

/// Render headings, paragraphs and list items in document order.
pub(crate) fn html_to_markdown(source: &str) -> Result<(String, Option<String>), ConvertError> {
    let document = Html::parse_document(source);
    let blocks = selector(BLOCKS)?;

    let title = document
        .select(&selector("title")?)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut out = String::new();
    for element in document.select(&blocks) {
        // Nested blocks are rendered by their outermost block
        if element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| blocks.matches(&a))
        {
            continue;
        }

        let text = collapse_whitespace(&element.text().collect::<String>());
        if text.is_empty() {
            continue;
        }

        let name = element.value().name();
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                out.push_str(&"#".repeat(level));
                out.push(' ');
                out.push_str(&text);
            }
            "li" | "dd" | "dt" | "td" | "th" => {
                out.push_str("- ");
                out.push_str(&text);
            }
            "blockquote" => {
                out.push_str("> ");
                out.push_str(&text);
            }
            "pre" => {
                out.push_str("```\n");
                out.push_str(element.text().collect::<String>().trim_end());
                out.push_str("\n```");
            }
            _ => out.push_str(&text),
        }
        out.push_str("\n\n");
    }

    // Pages without block markup still have body text
    if out.trim().is_empty() {
        if let Some(body) = document.select(&selector("body")?).next() {
            out = collapse_whitespace(&body.text().collect::<String>());
        }
    }

    Ok((out, title))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_paragraphs_and_lists() {
        let html = r#"<html><head><title> Onboarding  Guide </title></head><body>
            <h1>Welcome</h1>
            <p>First   day <b>checklist</b>.</p>
            <ul><li>Laptop</li><li><p>Badge</p></li></ul>
            <h2>Contacts</h2>
        </body></html>"#;
        let (text, title) = html_to_markdown(html).unwrap();
        assert_eq!(title.as_deref(), Some("Onboarding Guide"));
        assert_eq!(
            text,
            "# Welcome\n\nFirst day checklist.\n\n- Laptop\n\n- Badge\n\n## Contacts\n\n"
        );
    }

    #[test]
    fn test_body_text_fallback() {
        let (text, title) = html_to_markdown("<body>just <i>inline</i> text</body>").unwrap();
        assert_eq!(text, "just inline text");
        assert!(title.is_none());
    }

    #[tokio::test]
    async fn test_convert() {
        let out = HtmlConverter
            .convert(b"<h1>Hi</h1><p>there</p>", &TypeSignature::from_origin("a.html"))
            .await
            .unwrap();
        assert!(out.text.starts_with("# Hi"));
    }
}
