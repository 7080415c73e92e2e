//! Voice activity detection using energy-based analysis.
//!
//! Uses RMS energy thresholding to classify incoming audio frames. The
//! detector is a capability trait so a model-based implementation can be
//! substituted without touching the ingest pipeline.

use crate::config::VadConfig;

/// Classifies audio frames as speech or silence.
pub trait VoiceActivityDetector: Send {
    /// Whether this frame contains speech.
    fn is_speech(&mut self, frame: &[f32]) -> bool;
}

/// Voice activity detector using RMS energy thresholding.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Create a detector from configuration.
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold: config.threshold,
        }
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&mut self, frame: &[f32]) -> bool {
        compute_rms_energy(frame) > self.threshold
    }
}

/// Compute RMS energy of audio samples.
pub fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
