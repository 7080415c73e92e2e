//! Text-to-speech capability.
//!
//! The egress pipeline treats synthesis as an abstract [`Synthesizer`]
//! returning f32 PCM at the engine's native rate. The shipped
//! implementation posts text to an external TTS server and decodes the
//! WAV reply.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use std::io::Cursor;
use tracing::debug;

/// Synthesized audio at the synthesizer's native sample rate.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// f32 mono samples.
    pub samples: Vec<f32>,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
}

/// Synthesizes one sentence of speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize the sentence to PCM.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Synthesis`] on failure; the caller skips
    /// the sentence and continues with the next.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

/// TTS client posting text to an HTTP endpoint that returns WAV audio.
pub struct HttpSynthesizer {
    url: String,
    voice: String,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    /// Create a client for the given endpoint URL and voice id.
    pub fn new(url: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            voice: voice.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "input": text, "voice": self.voice }))
            .send()
            .await
            .map_err(|e| AssistantError::Synthesis(format!("TTS request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Synthesis(format!("TTS HTTP error: {e}")))?;

        let wav = response
            .bytes()
            .await
            .map_err(|e| AssistantError::Synthesis(format!("TTS response read failed: {e}")))?;

        let audio = decode_wav(&wav)?;
        debug!(
            samples = audio.samples.len(),
            rate = audio.sample_rate,
            "synthesized sentence"
        );
        Ok(audio)
    }
}

/// Decode a WAV file into f32 mono samples.
///
/// Multi-channel audio is downmixed by taking the first channel.
fn decode_wav(bytes: &[u8]) -> Result<SynthesizedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| AssistantError::Synthesis(format!("WAV decode failed: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| AssistantError::Synthesis(format!("WAV decode failed: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AssistantError::Synthesis(format!("WAV decode failed: {e}")))?
        }
    };

    Ok(SynthesizedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn wav_fixture(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("writer");
        for s in samples {
            writer.write_sample(*s).expect("sample");
        }
        writer.finalize().expect("finalize");
        cursor.into_inner()
    }

    #[test]
    fn decode_int16_wav_scales_to_unit_range() {
        let wav = wav_fixture(&[0, i16::MAX, i16::MIN], 22_050);
        let audio = decode_wav(&wav).expect("decode");
        assert_eq!(audio.sample_rate, 22_050);
        assert_eq!(audio.samples.len(), 3);
        assert!(audio.samples[0].abs() < 1e-6);
        assert!((audio.samples[1] - 1.0).abs() < 1e-3);
        assert!((audio.samples[2] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn garbage_bytes_are_synthesis_error() {
        let err = decode_wav(b"not a wav").expect_err("must fail");
        assert!(matches!(err, AssistantError::Synthesis(_)));
    }

    #[tokio::test]
    async fn http_synthesizer_round_trips_wav() {
        let server = MockServer::start().await;
        let wav = wav_fixture(&[100, -100, 200], 24_000);
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"input": "Hello."})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav))
            .mount(&server)
            .await;

        let synth = HttpSynthesizer::new(format!("{}/synthesize", server.uri()), "default");
        let audio = synth.synthesize("Hello.").await.expect("synthesize");
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.samples.len(), 3);
    }
}
