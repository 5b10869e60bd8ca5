//! Plain text passthrough, including Markdown and source code.

use super::encoding::decode_text;
use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;

/// Decodes text files in whatever encoding their bytes carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextConverter;

#[async_trait]
impl Converter for TextConverter {
    fn capability(&self) -> Capability {
        Capability::Text
    }

    async fn convert(
        &self,
        bytes: &[u8],
        signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        let decoded = decode_text(bytes);
        let mut converted = decoded.annotate(Converted::new(decoded.text.clone()));

        if let Some(language) = signature.extension.as_deref().and_then(detect_language) {
            converted = converted.with_meta("language", language);
        }
        Ok(converted)
    }
}

fn detect_language(extension: &str) -> Option<&'static str> {
    match extension {
        "rs" => Some("rust"),
        "py" => Some("python"),
        "js" | "jsx" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "go" => Some("go"),
        "c" | "h" => Some("c"),
        "cpp" | "hpp" => Some("cpp"),
        "java" => Some("java"),
        "kt" => Some("kotlin"),
        "rb" => Some("ruby"),
        "php" => Some("php"),
        "sh" => Some("shell"),
        "sql" => Some("sql"),
        "css" => Some("css"),
        "md" | "markdown" => Some("markdown"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::encoding::fixtures::{utf16le_with_bom, windows_1251, RUSSIAN};
    use super::*;

    #[tokio::test]
    async fn test_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("# Заметки\n".as_bytes());
        let out = TextConverter
            .convert(&bytes, &TypeSignature::from_origin("notes.md"))
            .await
            .unwrap();
        assert_eq!(out.text, "# Заметки\n");
        assert!(!out.partial);
        assert_eq!(out.metadata["language"], "markdown");
        assert_eq!(out.metadata["encoding"], "UTF-8");
    }

    #[tokio::test]
    async fn test_cp1251_notes_are_transcoded() {
        let out = TextConverter
            .convert(&windows_1251(RUSSIAN), &TypeSignature::from_origin("notes.txt"))
            .await
            .unwrap();
        assert_eq!(out.text, RUSSIAN);
        assert_eq!(out.metadata["encoding"], "windows-1251");
    }

    #[tokio::test]
    async fn test_utf16le_notes_are_transcoded() {
        let out = TextConverter
            .convert(
                &utf16le_with_bom("Отчёт\nза квартал\n"),
                &TypeSignature::from_origin("report.txt"),
            )
            .await
            .unwrap();
        assert_eq!(out.text, "Отчёт\nза квартал\n");
        assert_eq!(out.metadata["encoding"], "UTF-16LE");
        assert!(!out.partial);
    }

    #[tokio::test]
    async fn test_non_utf8_bytes_are_not_labelled_utf8() {
        let out = TextConverter
            .convert(b"ok \xC3\x28 bytes", &TypeSignature::from_origin("a.txt"))
            .await
            .unwrap();
        assert_ne!(out.metadata["encoding"], "UTF-8");
        assert!(out.text.starts_with("ok "));
    }
}
