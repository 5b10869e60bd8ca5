//! OCR processing using Tesseract.

use crate::error::{ProcessError, ProcessResult};
use crate::tools::{command, ensure_exists, spill_to_temp};
use std::path::Path;
use tracing::debug;

/// Result of OCR processing.
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// The extracted text.
    pub text: String,
    /// Tesseract languages used, e.g. `eng+rus`.
    pub languages: String,
}

/// Perform OCR on an image file.
pub async fn ocr_image(image_path: &Path, languages: &str) -> ProcessResult<OcrResult> {
    ensure_exists(image_path)?;

    debug!("Running OCR on {:?} ({})", image_path, languages);

    let mut cmd = command("tesseract")?;
    cmd.arg(image_path)
        .arg("stdout") // Output to stdout instead of file
        .args(["-l", languages])
        .args(["--oem", "3"]) // LSTM + legacy engine
        .args(["--psm", "1"]); // Automatic page segmentation with OSD

    let output = cmd.output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Tesseract sometimes outputs warnings to stderr but still works
        if !output.stdout.is_empty() {
            debug!("Tesseract warning: {}", stderr);
        } else {
            return Err(ProcessError::OcrError(stderr.trim().to_string()));
        }
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();

    Ok(OcrResult {
        text,
        languages: languages.to_string(),
    })
}

/// Perform OCR on in-memory image bytes.
pub async fn ocr_image_bytes(
    bytes: &[u8],
    extension: &str,
    languages: &str,
) -> ProcessResult<OcrResult> {
    let file = spill_to_temp(bytes, extension)?;
    let result = ocr_image(file.path(), languages).await;
    drop(file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_image() {
        let result = ocr_image(Path::new("/nonexistent/scan.png"), "eng").await;
        assert!(matches!(result, Err(ProcessError::FileNotFound(_))));
    }
}
