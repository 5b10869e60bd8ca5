//! Conversion to canonical text.
//!
//! The normalizer picks a backend from the registry, runs it under the
//! configured timeout and turns whatever comes back into a [`Document`]. It
//! never fails: every problem becomes a `failed` document carrying the reason.

use crate::converters::{Capability, ConverterRegistry};
use crate::error::ConvertError;
use lore_config::ConvertConfig;
use lore_core::{
    ConversionFailure, ConversionStatus, Document, FailureKind, Fingerprint, Section, SourceRef,
    TypeSignature,
};
use lore_process::ProcessError;
use pulldown_cmark::{Event, Parser, Tag};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Normalizer {
    registry: Arc<ConverterRegistry>,
    timeout: Duration,
    max_document_bytes: usize,
}

impl Normalizer {
    pub fn new(registry: Arc<ConverterRegistry>, config: &ConvertConfig) -> Self {
        Self::with_limits(
            registry,
            Duration::from_secs(config.timeout_seconds),
            config.max_document_bytes,
        )
    }

    pub fn with_limits(
        registry: Arc<ConverterRegistry>,
        timeout: Duration,
        max_document_bytes: usize,
    ) -> Self {
        Self {
            registry,
            timeout,
            max_document_bytes,
        }
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    /// Convert the bytes of one source item.
    pub async fn normalize(
        &self,
        fingerprint: Fingerprint,
        source: &SourceRef,
        signature: &TypeSignature,
        bytes: &[u8],
    ) -> Document {
        let (capability, backend) = match self.registry.resolve(signature) {
            Ok(found) => found,
            Err(failure) => {
                debug!("Skipping {}: {}", source.origin_id, failure);
                return failed(fingerprint, source, None, failure);
            }
        };

        let converted = match tokio::time::timeout(self.timeout, backend.convert(bytes, signature)).await {
            Ok(Ok(converted)) => converted,
            Ok(Err(e)) => {
                warn!("Conversion of {} failed: {}", source.origin_id, e);
                let failure = ConversionFailure::new(failure_kind(&e), e.to_string());
                return failed(fingerprint, source, Some(capability), failure);
            }
            Err(_) => {
                warn!(
                    "Conversion of {} timed out after {}s",
                    source.origin_id,
                    self.timeout.as_secs()
                );
                let failure = ConversionFailure::new(
                    FailureKind::Timeout,
                    format!("no result within {}s", self.timeout.as_secs()),
                );
                return failed(fingerprint, source, Some(capability), failure);
            }
        };

        let mut text = clean_text(&converted.text);
        if text.is_empty() {
            let failure = ConversionFailure::new(FailureKind::Empty, "no text extracted");
            return failed(fingerprint, source, Some(capability), failure);
        }

        let truncated = text.len() > self.max_document_bytes;
        if truncated {
            text = truncate(&text, self.max_document_bytes);
        }

        let sections = markdown_sections(&text);
        let title = converted
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| sections.iter().find(|s| s.level == 1).map(|s| s.title.clone()))
            .unwrap_or_else(|| file_stem(&source.origin_id));

        let mut metadata = converted.metadata;
        metadata.insert("signature".into(), signature.to_string().into());
        metadata.insert("source_bytes".into(), bytes.len().into());
        if truncated {
            metadata.insert("truncated".into(), true.into());
        }

        let status = if converted.partial || truncated {
            ConversionStatus::Partial
        } else {
            ConversionStatus::Ok
        };

        Document::new(fingerprint, source, text)
            .with_title(title)
            .with_capability(capability.as_str())
            .with_sections(sections)
            .with_status(status)
            .with_metadata(serde_json::Value::Object(metadata))
    }
}

fn failed(
    fingerprint: Fingerprint,
    source: &SourceRef,
    capability: Option<Capability>,
    failure: ConversionFailure,
) -> Document {
    let mut doc = Document::failed(fingerprint, source, failure);
    if let Some(capability) = capability {
        doc = doc.with_capability(capability.as_str());
    }
    doc
}

fn failure_kind(err: &ConvertError) -> FailureKind {
    match err {
        ConvertError::Unsupported(_) => FailureKind::Unsupported,
        ConvertError::Process(ProcessError::UnsupportedFormat(_)) => FailureKind::Unsupported,
        _ => FailureKind::Conversion,
    }
}

/// Normalise line endings and blank lines, and strip trailing whitespace.
pub(crate) fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n").replace('\0', "");

    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim_matches('\n').to_string()
}

/// Cut text to at most `max` bytes on a char boundary.
fn truncate(text: &str, max: usize) -> String {
    let mut end = max.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].trim_end().to_string()
}

/// Markdown headings with their byte offsets.
pub(crate) fn markdown_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<(u8, usize, String)> = None;

    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading(level, _, _)) => {
                current = Some((level as u8, range.start, String::new()));
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, _, title)) = current.as_mut() {
                    title.push_str(&t);
                }
            }
            Event::End(Tag::Heading(..)) => {
                if let Some((level, offset, title)) = current.take() {
                    sections.push(Section::new(title.trim(), level, offset));
                }
            }
            _ => {}
        }
    }

    sections
}

fn file_stem(origin_id: &str) -> String {
    Path::new(origin_id)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(origin_id)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::{Converted, Converter};
    use async_trait::async_trait;

    struct Fixed {
        capability: Capability,
        output: Result<Converted, String>,
        delay: Duration,
    }

    #[async_trait]
    impl Converter for Fixed {
        fn capability(&self) -> Capability {
            self.capability
        }

        async fn convert(
            &self,
            _bytes: &[u8],
            _signature: &TypeSignature,
        ) -> Result<Converted, ConvertError> {
            tokio::time::sleep(self.delay).await;
            self.output.clone().map_err(ConvertError::Failed)
        }
    }

    fn normalizer_with(output: Result<Converted, String>, delay: Duration, max: usize) -> Normalizer {
        let mut registry = ConverterRegistry::empty();
        registry.register(Arc::new(Fixed {
            capability: Capability::Pdf,
            output,
            delay,
        }));
        Normalizer::with_limits(Arc::new(registry), Duration::from_millis(200), max)
    }

    async fn run(normalizer: &Normalizer, origin: &str) -> Document {
        let source = SourceRef::new("kb", origin);
        let fp = Fingerprint::compute("kb", origin, b"bytes");
        normalizer
            .normalize(fp, &source, &TypeSignature::from_origin(origin), b"bytes")
            .await
    }

    #[tokio::test]
    async fn test_successful_conversion() {
        let converted = Converted::new("# Annual report\r\n\r\n\r\n\r\nRevenue grew.   \r\n## Costs\r\nFlat.");
        let normalizer = normalizer_with(Ok(converted), Duration::ZERO, 10_000);
        let doc = run(&normalizer, "reports/2023.pdf").await;

        assert_eq!(doc.status, ConversionStatus::Ok);
        assert_eq!(doc.text, "# Annual report\n\nRevenue grew.\n## Costs\nFlat.");
        assert_eq!(doc.title.as_deref(), Some("Annual report"));
        assert_eq!(doc.capability.as_deref(), Some("pdf"));
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[1].title, "Costs");
        assert_eq!(doc.sections[1].level, 2);
        assert_eq!(&doc.text[doc.sections[1].offset..doc.sections[1].offset + 8], "## Costs");
        assert_eq!(doc.metadata["source_bytes"], 5);
    }

    #[tokio::test]
    async fn test_converter_title_wins_then_file_stem() {
        let normalizer = normalizer_with(
            Ok(Converted::new("# Heading\n\nbody").with_title("Given")),
            Duration::ZERO,
            10_000,
        );
        assert_eq!(run(&normalizer, "a.pdf").await.title.as_deref(), Some("Given"));

        let normalizer = normalizer_with(Ok(Converted::new("no headings")), Duration::ZERO, 10_000);
        assert_eq!(run(&normalizer, "dir/minutes.pdf").await.title.as_deref(), Some("minutes"));
    }

    #[tokio::test]
    async fn test_unsupported_signature() {
        let normalizer = normalizer_with(Ok(Converted::new("x")), Duration::ZERO, 10_000);
        let doc = run(&normalizer, "blob.bin").await;
        assert!(doc.is_failed());
        assert_eq!(doc.failure.unwrap().kind, FailureKind::Unsupported);
        assert!(doc.capability.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_is_recorded() {
        let normalizer = normalizer_with(Err("bad xref table".into()), Duration::ZERO, 10_000);
        let doc = run(&normalizer, "broken.pdf").await;
        assert!(doc.is_failed());
        assert!(doc.text.is_empty());
        let failure = doc.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Conversion);
        assert_eq!(failure.reason, "bad xref table");
    }

    #[tokio::test]
    async fn test_timeout() {
        let normalizer = normalizer_with(Ok(Converted::new("late")), Duration::from_secs(5), 10_000);
        let doc = run(&normalizer, "slow.pdf").await;
        assert_eq!(doc.failure.unwrap().kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_empty_output_fails() {
        let normalizer = normalizer_with(Ok(Converted::new(" \n\n\t\n")), Duration::ZERO, 10_000);
        let doc = run(&normalizer, "scan.pdf").await;
        assert_eq!(doc.failure.unwrap().kind, FailureKind::Empty);
    }

    #[tokio::test]
    async fn test_truncation_marks_partial() {
        let normalizer = normalizer_with(Ok(Converted::new("ёёёёё")), Duration::ZERO, 5);
        let doc = run(&normalizer, "long.pdf").await;
        assert_eq!(doc.status, ConversionStatus::Partial);
        assert_eq!(doc.text, "ёё");
        assert_eq!(doc.metadata["truncated"], true);
    }

    #[tokio::test]
    async fn test_partial_flag_propagates() {
        let normalizer = normalizer_with(Ok(Converted::new("text").partial(true)), Duration::ZERO, 100);
        assert_eq!(run(&normalizer, "a.pdf").await.status, ConversionStatus::Partial);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("a\r\nb\rc\n\n\n\n\nd  \n\n"), "a\nb\nc\n\nd");
        assert_eq!(clean_text("\n\n  indented\n"), "  indented");
    }

    #[test]
    fn test_same_bytes_same_text() {
        let a = markdown_sections("# A\n\ntext\n\n## B\n");
        let b = markdown_sections("# A\n\ntext\n\n## B\n");
        assert_eq!(a, b);
        assert_eq!(a[0].offset, 0);
        assert_eq!(a[1].offset, 11);
    }
}
