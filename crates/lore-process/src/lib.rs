//! Lore Process - External converter backends.
//!
//! This crate provides:
//! - Document conversion to Markdown (via the Pandoc CLI)
//! - Audio transcription (via the Whisper CLI)
//! - OCR for images (via the Tesseract CLI)
//!
//! These rely on external tools being installed on the system. Child processes
//! are spawned with `kill_on_drop`, so dropping a conversion future (for
//! example on timeout) terminates the tool.

mod error;
mod ocr;
mod pandoc;
mod tools;
mod transcribe;

pub use error::{ProcessError, ProcessResult};
pub use ocr::{ocr_image, ocr_image_bytes, OcrResult};
pub use pandoc::{pandoc_input_format, pandoc_to_markdown};
pub use tools::require_tool;
pub use transcribe::{format_transcript, transcribe_audio, transcribe_audio_bytes, TranscriptSegment};

/// Check which external tools are available.
pub fn check_dependencies() -> Vec<(&'static str, bool)> {
    vec![
        ("pandoc", which::which("pandoc").is_ok()),
        ("tesseract", which::which("tesseract").is_ok()),
        ("whisper", which::which("whisper").is_ok()),
    ]
}
