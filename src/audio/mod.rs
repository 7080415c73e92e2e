//! Audio pipelines for the voice protocol.
//!
//! Ingest accumulates VAD-gated PCM into utterances; egress synthesizes
//! sentences and streams them back as wire frames.

pub mod egress;
pub mod ingest;
pub mod tone;

/// Convert int16 wire samples to f32 in \[-1, 1\].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|s| *s as f32 / 32768.0).collect()
}

/// Convert f32 samples to int16, clamping to the valid range.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}
