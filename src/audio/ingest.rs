//! Audio ingest: VAD-gated utterance capture.
//!
//! Accumulates f32 PCM while the detector reports speech and emits a
//! complete utterance once trailing silence exceeds the timeout. A
//! `STOP` frame flushes whatever has been captured.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::VadConfig;
use crate::vad::VoiceActivityDetector;

/// What one ingest step produced.
#[derive(Debug, Default)]
pub struct IngestOutput {
    /// Whether this frame started a new utterance (first speech after
    /// silence). The caller clears the session cancel flag on this edge.
    pub speech_started: bool,
    /// Completed utterance samples, if the silence timeout elapsed.
    pub utterance: Option<Vec<f32>>,
}

/// Per-connection utterance capture state.
pub struct AudioIngest {
    vad: Box<dyn VoiceActivityDetector>,
    frames: Vec<f32>,
    recording: bool,
    last_voice: Instant,
    silence_timeout: Duration,
}

impl AudioIngest {
    /// Create an ingest pipeline with the given detector.
    pub fn new(vad: Box<dyn VoiceActivityDetector>, config: &VadConfig) -> Self {
        Self {
            vad,
            frames: Vec::new(),
            recording: false,
            last_voice: Instant::now(),
            silence_timeout: Duration::from_millis(config.silence_timeout_ms),
        }
    }

    /// Feed one frame of f32 PCM.
    pub fn push_frame(&mut self, frame: &[f32], now: Instant) -> IngestOutput {
        let mut output = IngestOutput::default();

        if self.vad.is_speech(frame) {
            if !self.recording {
                self.recording = true;
                output.speech_started = true;
                debug!("utterance started");
            }
            self.frames.extend_from_slice(frame);
            self.last_voice = now;
        } else if self.recording && now.duration_since(self.last_voice) > self.silence_timeout {
            output.utterance = self.flush();
        }

        output
    }

    /// Force end-of-utterance (`STOP` frame or teardown).
    ///
    /// Returns the captured samples, if any.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        self.recording = false;
        if self.frames.is_empty() {
            return None;
        }
        debug!(samples = self.frames.len(), "utterance complete");
        Some(std::mem::take(&mut self.frames))
    }

    /// Drop the capture buffer without emitting (barge-in).
    pub fn reset(&mut self) {
        self.frames.clear();
        self.recording = false;
    }

    /// Whether an utterance is currently being captured.
    pub fn recording(&self) -> bool {
        self.recording
    }
}
