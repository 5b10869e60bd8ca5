//! Audio transcription using Whisper.

use crate::error::{ProcessError, ProcessResult};
use crate::tools::{command, ensure_exists, run, spill_to_temp};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// A segment of transcribed audio.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    /// The transcribed text.
    pub text: String,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonOutput {
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    text: String,
    start: f64,
    end: f64,
}

/// Transcribe an audio file using Whisper. The spoken language is auto-detected.
///
/// Requires the `whisper` CLI to be installed (pip install openai-whisper).
pub async fn transcribe_audio(
    audio_path: &Path,
    model: &str,
    output_dir: &Path,
) -> ProcessResult<Vec<TranscriptSegment>> {
    ensure_exists(audio_path)?;

    info!("Transcribing {:?} with model '{}'", audio_path, model);

    let mut cmd = command("whisper")?;
    cmd.arg(audio_path)
        .args(["--model", model])
        .args(["--output_format", "json"])
        .arg("--output_dir")
        .arg(output_dir);
    run("whisper", cmd).await.map_err(|e| match e {
        ProcessError::ProcessFailed { stderr, .. } => ProcessError::TranscriptionError(stderr),
        other => other,
    })?;

    let stem = audio_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let json_path = output_dir.join(format!("{}.json", stem));

    if !json_path.exists() {
        return Err(ProcessError::TranscriptionError(
            "Whisper output file not found".to_string(),
        ));
    }

    let json_content = tokio::fs::read_to_string(&json_path).await?;
    let segments = parse_whisper_json(&json_content)?;

    debug!("Transcribed {} segments", segments.len());
    Ok(segments)
}

/// Transcribe in-memory audio bytes.
pub async fn transcribe_audio_bytes(
    bytes: &[u8],
    extension: &str,
    model: &str,
) -> ProcessResult<Vec<TranscriptSegment>> {
    let input = spill_to_temp(bytes, extension)?;
    let output_dir = tempfile::tempdir()?;
    transcribe_audio(input.path(), model, output_dir.path()).await
}

fn parse_whisper_json(json: &str) -> ProcessResult<Vec<TranscriptSegment>> {
    let output: WhisperJsonOutput = serde_json::from_str(json)
        .map_err(|e| ProcessError::ParseError(format!("Failed to parse Whisper output: {}", e)))?;

    Ok(output
        .segments
        .into_iter()
        .map(|s| TranscriptSegment {
            text: s.text.trim().to_string(),
            start: s.start,
            end: s.end,
        })
        .filter(|s| !s.text.is_empty())
        .collect())
}

/// Render segments as `[mm:ss] text` lines.
pub fn format_transcript(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| {
            format!(
                "[{:02}:{:02}] {}",
                (s.start / 60.0) as u32,
                (s.start % 60.0) as u32,
                s.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_transcript() {
        let segments = vec![
            TranscriptSegment {
                text: "Hello".to_string(),
                start: 0.0,
                end: 1.0,
            },
            TranscriptSegment {
                text: "world".to_string(),
                start: 65.0,
                end: 66.0,
            },
        ];

        let formatted = format_transcript(&segments);
        assert_eq!(formatted, "[00:00] Hello\n[01:05] world");
    }

    #[test]
    fn test_parse_whisper_json() {
        let json = r#"{
            "text": " Hi there. ",
            "segments": [
                {"id": 0, "text": " Hi there.", "start": 0.0, "end": 1.5},
                {"id": 1, "text": "   ", "start": 1.5, "end": 2.0}
            ],
            "language": "en"
        }"#;
        let segments = parse_whisper_json(json).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Hi there.");
    }

    #[test]
    fn test_parse_whisper_json_invalid() {
        assert!(matches!(
            parse_whisper_json("not json"),
            Err(ProcessError::ParseError(_))
        ));
    }
}
