//! Speech to text through whisper.

use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;
use lore_process::{format_transcript, transcribe_audio_bytes};

#[derive(Debug, Clone)]
pub struct TranscribeConverter {
    model: String,
}

impl TranscribeConverter {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Converter for TranscribeConverter {
    fn capability(&self) -> Capability {
        Capability::AudioTranscription
    }

    async fn convert(
        &self,
        bytes: &[u8],
        signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        let extension = signature.extension.as_deref().unwrap_or("wav");
        let segments = transcribe_audio_bytes(bytes, extension, &self.model).await?;
        let duration = segments.last().map(|s| s.end).unwrap_or(0.0);

        Ok(Converted::new(format_transcript(&segments))
            .with_meta("segments", segments.len())
            .with_meta("duration_seconds", duration)
            .with_meta("whisper_model", self.model.clone()))
    }
}
