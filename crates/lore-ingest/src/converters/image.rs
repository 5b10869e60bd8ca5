//! OCR for images through tesseract.

use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;

#[derive(Debug, Clone)]
pub struct OcrConverter {
    languages: String,
}

impl OcrConverter {
    /// `languages` uses tesseract's `eng+rus` syntax.
    pub fn new(languages: &str) -> Self {
        Self {
            languages: languages.to_string(),
        }
    }
}

#[async_trait]
impl Converter for OcrConverter {
    fn capability(&self) -> Capability {
        Capability::ImageOcr
    }

    async fn convert(
        &self,
        bytes: &[u8],
        signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        let extension = signature.extension.as_deref().unwrap_or("png");
        let result = lore_process::ocr_image_bytes(bytes, extension, &self.languages).await?;
        Ok(Converted::new(result.text).with_meta("ocr_languages", result.languages))
    }
}
