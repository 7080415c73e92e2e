//! Vesper: a voice-first assistant server.
//!
//! Mediates between remote audio satellites, a streaming LLM backend,
//! and side-effect tools (home automation, weather, search, math, time,
//! behaviour rules).
//!
//! # Architecture
//!
//! Per satellite connection: Frame Codec → Audio Ingest (VAD) →
//! Transcriber → Conversation Loop → Streaming Parser → response queue →
//! TTS Egress → Frame Codec. Tool calls detected in the model stream are
//! dispatched and their wrapped results reinjected as synthetic turns.
//! The chat and admin HTTP surfaces share the same conversation core.

pub mod asr;
pub mod audio;
pub mod config;
pub mod core;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod store;
pub mod stream;
pub mod synth;
pub mod tools;
pub mod vad;
pub mod voice;
pub mod web;

pub use crate::config::AssistantConfig;
pub use crate::core::Assistant;
pub use crate::error::{AssistantError, Result};
pub use crate::voice::VoiceServer;
