//! Speech-to-text capability.
//!
//! The conversation runtime treats transcription as an abstract
//! [`Transcriber`]. The shipped implementation posts a WAV body to an
//! external ASR server and reads back `{"text": …}`.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Cursor;
use tracing::info;

/// One transcribed span of an utterance.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Transcribed text for this span.
    pub text: String,
}

/// Transcribes a complete utterance.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe f32 mono samples at the given rate into segments.
    ///
    /// The utterance text is the concatenation of the segment texts.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Capture`] when transcription fails; the
    /// caller discards the utterance and keeps listening.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Segment>>;
}

/// Join segments into the utterance text.
pub fn utterance_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// ASR client posting WAV audio to an HTTP endpoint.
pub struct HttpTranscriber {
    url: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    /// Create a client for the given endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Segment>> {
        let wav = encode_wav(samples, sample_rate)?;
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&self.url)
            .header("content-type", "audio/wav")
            .body(wav)
            .send()
            .await
            .map_err(|e| AssistantError::Capture(format!("ASR request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Capture(format!("ASR HTTP error: {e}")))?;

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Capture(format!("ASR response parse failed: {e}")))?;

        info!(
            "transcribed in {:.0}ms: \"{}\"",
            started.elapsed().as_millis(),
            body.text
        );

        Ok(vec![Segment { text: body.text }])
    }
}

/// Encode f32 mono samples as a 16-bit PCM WAV file in memory.
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| AssistantError::Capture(format!("WAV encode failed: {e}")))?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| AssistantError::Capture(format!("WAV encode failed: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| AssistantError::Capture(format!("WAV encode failed: {e}")))?;
    }
    Ok(cursor.into_inner())
}
