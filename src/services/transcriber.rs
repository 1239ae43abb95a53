//! Speech-to-text interface
//!
//! Transcription is pluggable behind the [`Transcriber`] trait so the
//! identification pipeline does not care which engine produces the text.
//! [`PlaceholderTranscriber`] stands in until a real backend is wired up and
//! returns fixed text so the rest of the pipeline can be exercised end to
//! end.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

// TODO: wire a real speech-to-text backend (whisper.cpp bindings or the
// OpenAI transcription API) behind this trait
/// Converts extracted audio payloads into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one audio payload to text
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Stand-in transcriber returning fixed text
pub struct PlaceholderTranscriber;

const PLACEHOLDER_TEXT: &str = "This is a placeholder transcription. In a real \
     implementation, this would be the actual transcribed text from the audio file.";

#[async_trait]
impl Transcriber for PlaceholderTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        debug!(bytes = audio.len(), "Transcribing audio payload");
        Ok(PLACEHOLDER_TEXT.to_string())
    }
}

/// Transcribe a batch of payloads in order
pub async fn transcribe_all(
    transcriber: &dyn Transcriber,
    payloads: &[Vec<u8>],
) -> Result<Vec<String>> {
    let mut transcripts = Vec::with_capacity(payloads.len());
    for payload in payloads {
        transcripts.push(transcriber.transcribe(payload).await?);
    }
    Ok(transcripts)
}
