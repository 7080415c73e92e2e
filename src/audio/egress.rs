//! TTS egress: sentence → synthesized PCM → wire frames.
//!
//! Each sentence is synthesized at the engine's native rate, resampled
//! to the wire rate, loudness-normalized, and chunked into `TTS0`
//! frames. The session cancel flag is checked between chunks, so
//! barge-in latency is bounded by one chunk of audio.

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use super::f32_to_i16;
use crate::config::EgressConfig;
use crate::error::Result;
use crate::protocol::{FrameTag, i16_to_payload, write_frame};
use crate::session::Session;
use crate::synth::Synthesizer;

/// Streams synthesized speech to a satellite.
pub struct TtsEgress {
    synth: Arc<dyn Synthesizer>,
    wire_rate: u32,
    target_rms: f32,
    gain: f32,
    chunk_samples: usize,
}

impl TtsEgress {
    /// Create an egress pipeline writing at the given wire rate.
    pub fn new(synth: Arc<dyn Synthesizer>, wire_rate: u32, config: &EgressConfig) -> Self {
        Self {
            synth,
            wire_rate,
            target_rms: config.target_rms,
            gain: config.gain,
            chunk_samples: config.chunk_samples,
        }
    }

    /// Synthesize and stream one sentence.
    ///
    /// Returns `false` when barge-in stopped the sentence early. A
    /// synthesis failure is logged and skipped (`true`), keeping the
    /// response going with the next sentence.
    ///
    /// # Errors
    ///
    /// Returns an error only when writing frames to the socket fails.
    pub async fn speak<W>(&self, writer: &mut W, session: &Session, sentence: &str) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        if session.cancelled() {
            return Ok(false);
        }

        let audio = match self.synth.synthesize(sentence).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("skipping sentence, synthesis failed: {e}");
                return Ok(true);
            }
        };

        let mut samples = resample_linear(&audio.samples, audio.sample_rate, self.wire_rate);
        normalize_rms(&mut samples, self.target_rms, self.gain);
        let pcm = f32_to_i16(&samples);

        debug!(
            sentence_chars = sentence.len(),
            samples = pcm.len(),
            "speaking sentence"
        );

        for chunk in pcm.chunks(self.chunk_samples) {
            if session.cancelled() {
                debug!("barge-in observed between chunks; stopping sentence");
                return Ok(false);
            }
            write_frame(writer, FrameTag::Tts0, &i16_to_payload(chunk)).await?;
            // Yield so an incoming INT0 can be serviced promptly.
            tokio::task::yield_now().await;
        }
        Ok(true)
    }
}

/// Linear-interpolation resampler.
///
/// Quality is fine for speech; the synthesizer output is already
/// band-limited well below the wire Nyquist.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}

/// Scale to the target RMS, apply fixed gain, clip to \[-1, 1\].
pub fn normalize_rms(samples: &mut [f32], target_rms: f32, gain: f32) {
    let rms = crate::vad::compute_rms_energy(samples);
    if rms > 0.0 {
        let scale = (target_rms / rms) * gain;
        for sample in samples.iter_mut() {
            *sample = (*sample * scale).clamp(-1.0, 1.0);
        }
    }
}
