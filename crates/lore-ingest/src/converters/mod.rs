//! Converter registry and backends.
//!
//! Selection is an explicit table from lower-cased extension or MIME type to a
//! [`Capability`]; each capability has at most one backend. There is no
//! content sniffing: a signature that is not in the table is unsupported.

mod audio;
mod encoding;
mod html;
mod image;
mod office;
mod pdf;
mod presentation;
mod spreadsheet;
mod text;
mod xml;

pub use audio::TranscribeConverter;
pub use html::HtmlConverter;
pub use image::OcrConverter;
pub use office::OfficeConverter;
pub use pdf::PdfConverter;
pub use presentation::PresentationConverter;
pub use spreadsheet::SpreadsheetConverter;
pub use text::TextConverter;

use crate::error::ConvertError;
use async_trait::async_trait;
use lore_config::ConvertConfig;
use lore_core::{ConversionFailure, FailureKind, TypeSignature};
use std::collections::HashMap;
use std::sync::Arc;

/// What kind of conversion a source needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Text,
    OfficeDocument,
    Spreadsheet,
    Presentation,
    Pdf,
    Html,
    ImageOcr,
    AudioTranscription,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Text,
        Capability::OfficeDocument,
        Capability::Spreadsheet,
        Capability::Presentation,
        Capability::Pdf,
        Capability::Html,
        Capability::ImageOcr,
        Capability::AudioTranscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::OfficeDocument => "office-document",
            Capability::Spreadsheet => "spreadsheet",
            Capability::Presentation => "presentation",
            Capability::Pdf => "pdf",
            Capability::Html => "html",
            Capability::ImageOcr => "image-ocr",
            Capability::AudioTranscription => "audio-transcription",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw output of a converter backend, before normalisation.
#[derive(Debug, Clone, Default)]
pub struct Converted {
    /// Markdown-like text. Structural boundaries (pages, slides, sheets) are
    /// rendered as headings.
    pub text: String,
    pub title: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Some content could not be decoded and was replaced or skipped.
    pub partial: bool,
}

impl Converted {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }
}

/// A backend turning raw bytes of one capability into text.
///
/// Identical bytes must produce identical output.
#[async_trait]
pub trait Converter: Send + Sync {
    fn capability(&self) -> Capability;

    async fn convert(&self, bytes: &[u8], signature: &TypeSignature)
        -> Result<Converted, ConvertError>;
}

const EXTENSIONS: &[(&str, Capability)] = &[
    // Plain text, markup and source code
    ("txt", Capability::Text),
    ("text", Capability::Text),
    ("md", Capability::Text),
    ("markdown", Capability::Text),
    ("rst", Capability::Text),
    ("org", Capability::Text),
    ("log", Capability::Text),
    ("json", Capability::Text),
    ("yaml", Capability::Text),
    ("yml", Capability::Text),
    ("toml", Capability::Text),
    ("ini", Capability::Text),
    ("xml", Capability::Text),
    ("rs", Capability::Text),
    ("py", Capability::Text),
    ("js", Capability::Text),
    ("ts", Capability::Text),
    ("jsx", Capability::Text),
    ("tsx", Capability::Text),
    ("go", Capability::Text),
    ("c", Capability::Text),
    ("h", Capability::Text),
    ("cpp", Capability::Text),
    ("hpp", Capability::Text),
    ("java", Capability::Text),
    ("kt", Capability::Text),
    ("rb", Capability::Text),
    ("php", Capability::Text),
    ("sh", Capability::Text),
    ("sql", Capability::Text),
    ("css", Capability::Text),
    // Markup rendered through the DOM
    ("html", Capability::Html),
    ("htm", Capability::Html),
    ("xhtml", Capability::Html),
    // Office
    ("docx", Capability::OfficeDocument),
    ("odt", Capability::OfficeDocument),
    ("rtf", Capability::OfficeDocument),
    ("epub", Capability::OfficeDocument),
    ("csv", Capability::Spreadsheet),
    ("tsv", Capability::Spreadsheet),
    ("xlsx", Capability::Spreadsheet),
    ("pptx", Capability::Presentation),
    ("pdf", Capability::Pdf),
    // Media
    ("png", Capability::ImageOcr),
    ("jpg", Capability::ImageOcr),
    ("jpeg", Capability::ImageOcr),
    ("tif", Capability::ImageOcr),
    ("tiff", Capability::ImageOcr),
    ("bmp", Capability::ImageOcr),
    ("gif", Capability::ImageOcr),
    ("webp", Capability::ImageOcr),
    ("mp3", Capability::AudioTranscription),
    ("wav", Capability::AudioTranscription),
    ("m4a", Capability::AudioTranscription),
    ("ogg", Capability::AudioTranscription),
    ("oga", Capability::AudioTranscription),
    ("flac", Capability::AudioTranscription),
    ("opus", Capability::AudioTranscription),
];

const MIME_TYPES: &[(&str, Capability)] = &[
    ("text/plain", Capability::Text),
    ("text/markdown", Capability::Text),
    ("application/json", Capability::Text),
    ("text/html", Capability::Html),
    ("application/xhtml+xml", Capability::Html),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Capability::OfficeDocument,
    ),
    ("application/vnd.oasis.opendocument.text", Capability::OfficeDocument),
    ("application/rtf", Capability::OfficeDocument),
    ("application/epub+zip", Capability::OfficeDocument),
    ("text/csv", Capability::Spreadsheet),
    ("text/tab-separated-values", Capability::Spreadsheet),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Capability::Spreadsheet,
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Capability::Presentation,
    ),
    ("application/pdf", Capability::Pdf),
];

/// MIME families mapped as a whole.
const MIME_FAMILIES: &[(&str, Capability)] = &[
    ("image/", Capability::ImageOcr),
    ("audio/", Capability::AudioTranscription),
];

/// Maps type signatures to capabilities and capabilities to backends.
///
/// Built once at start-up and shared behind an `Arc`.
#[derive(Clone)]
pub struct ConverterRegistry {
    extensions: HashMap<String, Capability>,
    mime_types: HashMap<String, Capability>,
    backends: HashMap<Capability, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// The default signature table with no backends registered.
    pub fn empty() -> Self {
        Self {
            extensions: EXTENSIONS
                .iter()
                .map(|(ext, cap)| (ext.to_string(), *cap))
                .collect(),
            mime_types: MIME_TYPES
                .iter()
                .map(|(mime, cap)| (mime.to_string(), *cap))
                .collect(),
            backends: HashMap::new(),
        }
    }

    /// The default table with the built-in backends enabled by `config`.
    pub fn from_config(config: &ConvertConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TextConverter));
        registry.register(Arc::new(HtmlConverter));
        registry.register(Arc::new(OfficeConverter::new(config.pandoc_enabled)));
        registry.register(Arc::new(SpreadsheetConverter));
        registry.register(Arc::new(PresentationConverter));
        registry.register(Arc::new(PdfConverter));
        if config.ocr_enabled {
            registry.register(Arc::new(OcrConverter::new(&config.ocr_languages)));
        }
        if config.transcribe {
            registry.register(Arc::new(TranscribeConverter::new(&config.whisper_model)));
        }
        registry
    }

    /// Register a backend, replacing any previous one for its capability.
    pub fn register(&mut self, converter: Arc<dyn Converter>) -> &mut Self {
        self.backends.insert(converter.capability(), converter);
        self
    }

    pub fn map_extension(&mut self, extension: &str, capability: Capability) -> &mut Self {
        self.extensions.insert(extension.to_lowercase(), capability);
        self
    }

    pub fn map_mime(&mut self, mime: &str, capability: Capability) -> &mut Self {
        self.mime_types.insert(mime.to_lowercase(), capability);
        self
    }

    /// Capability for a signature. A mapped MIME type wins over the extension.
    pub fn capability_for(&self, signature: &TypeSignature) -> Option<Capability> {
        let by_mime = signature.mime.as_deref().and_then(|mime| {
            let mime = mime.split(';').next().unwrap_or(mime).trim().to_lowercase();
            self.mime_types.get(&mime).copied().or_else(|| {
                MIME_FAMILIES
                    .iter()
                    .find(|(prefix, _)| mime.starts_with(prefix))
                    .map(|(_, cap)| *cap)
            })
        });

        by_mime.or_else(|| {
            signature
                .extension
                .as_deref()
                .and_then(|ext| self.extensions.get(&ext.to_lowercase()).copied())
        })
    }

    /// Backend for a signature, or the `unsupported` failure to record.
    pub fn resolve(
        &self,
        signature: &TypeSignature,
    ) -> Result<(Capability, Arc<dyn Converter>), ConversionFailure> {
        let capability = self.capability_for(signature).ok_or_else(|| {
            ConversionFailure::new(
                FailureKind::Unsupported,
                format!("no converter for {}", signature),
            )
        })?;
        let backend = self.backends.get(&capability).cloned().ok_or_else(|| {
            ConversionFailure::new(
                FailureKind::Unsupported,
                format!("{} conversion is disabled", capability),
            )
        })?;
        Ok((capability, backend))
    }

    /// Capabilities that currently have a backend.
    pub fn enabled(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|c| self.backends.contains_key(c))
            .collect()
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("extensions", &self.extensions.len())
            .field("mime_types", &self.mime_types.len())
            .field("backends", &self.enabled())
            .finish()
    }
}
