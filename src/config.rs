//! Configuration types for the assistant server.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Voice protocol server settings.
    pub voice: VoiceConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// TTS egress settings.
    pub egress: EgressConfig,
    /// Language model backend settings.
    pub llm: LlmConfig,
    /// Speech backend (ASR/TTS) endpoints.
    pub speech: SpeechBackendConfig,
    /// Chat and admin HTTP surfaces.
    pub web: WebConfig,
    /// Knowledge, instruction and behaviour file paths.
    pub store: StoreConfig,
    /// Tool side-effect endpoints (home automation, weather).
    pub integrations: IntegrationsConfig,
}

impl AssistantConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults so the server can start unconfigured.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| AssistantError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| AssistantError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Voice protocol server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// TCP bind address for the satellite protocol.
    pub bind: String,
    /// Greeting spoken when a satellite opens the channel.
    pub greeting: String,
    /// Phrase that closes the channel when it appears in an utterance.
    pub close_phrase: String,
    /// Wire sample rate in Hz (int16 mono both directions).
    pub sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:10400".to_owned(),
            greeting: "I'm here".to_owned(),
            close_phrase: "finish conversation".to_owned(),
            sample_rate: 16_000,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for speech detection.
    ///
    /// Audio frames with RMS above this value are classified as speech.
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.005: very sensitive (picks up quiet speech and some noise)
    ///   - 0.01:  normal sensitivity (default)
    ///   - 0.02:  reduced sensitivity (noisy environments)
    pub threshold: f32,
    /// Trailing silence in ms that ends an utterance.
    pub silence_timeout_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            silence_timeout_ms: 700,
        }
    }
}

/// TTS egress configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Target RMS after loudness normalization.
    pub target_rms: f32,
    /// Fixed gain applied before clipping to \[-1, 1\].
    pub gain: f32,
    /// Maximum samples per `TTS0` frame.
    pub chunk_samples: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            target_rms: 0.2,
            gain: 1.2,
            chunk_samples: 8192,
        }
    }
}

/// Language model backend configuration (Ollama-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the inference server.
    pub base_url: String,
    /// Model name passed on every request.
    pub model: String,
    /// How long the backend should keep the model resident.
    pub keep_alive: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_owned(),
            model: "llama3.2".to_owned(),
            keep_alive: "2h".to_owned(),
        }
    }
}

/// Speech backend endpoints for transcription and synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechBackendConfig {
    /// ASR endpoint accepting a WAV body and returning `{"text": …}`.
    pub transcribe_url: String,
    /// TTS endpoint accepting `{"input": …}` and returning a WAV body.
    pub synthesize_url: String,
    /// Voice identifier forwarded to the synthesizer.
    pub voice: String,
}

impl Default for SpeechBackendConfig {
    fn default() -> Self {
        Self {
            transcribe_url: "http://127.0.0.1:8000/transcribe".to_owned(),
            synthesize_url: "http://127.0.0.1:8880/synthesize".to_owned(),
            voice: "default".to_owned(),
        }
    }
}

/// Chat and admin HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address for the chat endpoint.
    pub chat_bind: String,
    /// Bind address for the admin endpoint.
    pub admin_bind: String,
    /// Path to a `KEY=value` file holding `ADMIN_TOKEN`. Absent → ungated.
    pub admin_token_file: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            chat_bind: "0.0.0.0:7860".to_owned(),
            admin_bind: "0.0.0.0:5010".to_owned(),
            admin_token_file: None,
        }
    }
}

/// Paths for the persistent prompt material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base instruction text, re-read on every prompt assembly.
    pub instructions_path: PathBuf,
    /// Knowledge-base text file appended to every prompt.
    pub knowledge_path: PathBuf,
    /// Behaviour override rules (JSON).
    pub behaviour_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vesper");
        Self {
            instructions_path: base.join("system_message.txt"),
            knowledge_path: base.join("knowledge.txt"),
            behaviour_path: base.join("behaviour.json"),
        }
    }
}

/// External integrations used by tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Home Assistant REST API base URL (e.g. `http://ha.lan:8123/api`).
    pub home_assistant_url: Option<String>,
    /// Path to a `KEY=value` file holding `HA_API_KEY`.
    pub home_assistant_key_file: Option<PathBuf>,
    /// Path to a `KEY=value` file holding `WEATHER_API_KEY`.
    pub weather_key_file: Option<PathBuf>,
    /// Default weather location when the model supplies none.
    pub weather_default_location: Option<String>,
}

/// Read a named key from a small `KEY=value` secrets file.
///
/// Lines that do not start with `key` are skipped; the value is stripped of
/// whitespace and surrounding double quotes.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the key is absent.
pub fn read_key_file(path: &Path, key: &str) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AssistantError::Config(format!("cannot read {}: {e}", path.display())))?;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(key) {
            if let Some(value) = rest.trim_start().strip_prefix('=') {
                return Ok(value.trim().trim_matches('"').to_owned());
            }
        }
    }
    Err(AssistantError::Config(format!(
        "{} not found in {}",
        key,
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = AssistantConfig::default();
        assert_eq!(config.voice.bind, "0.0.0.0:10400");
        assert_eq!(config.vad.silence_timeout_ms, 700);
        assert_eq!(config.egress.chunk_samples, 8192);
        assert!((config.egress.target_rms - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let config = AssistantConfig::load(Path::new("/nonexistent/vesper.toml"));
        assert!(config.is_ok());
    }

    #[test]
    fn load_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vesper.toml");
        std::fs::write(&path, "[voice]\ngreeting = \"Hello there\"\n").expect("write");

        let config = AssistantConfig::load(&path).expect("load");
        assert_eq!(config.voice.greeting, "Hello there");
        assert_eq!(config.voice.close_phrase, "finish conversation");
    }

    #[test]
    fn key_file_parses_quoted_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("weather_api");
        let mut f = std::fs::File::create(&path).expect("create");
        writeln!(f, "# comment").expect("write");
        writeln!(f, "WEATHER_API_KEY = \"abc123\"").expect("write");

        let key = read_key_file(&path, "WEATHER_API_KEY").expect("key");
        assert_eq!(key, "abc123");
    }

    #[test]
    fn key_file_missing_key_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty");
        std::fs::write(&path, "OTHER=1\n").expect("write");
        assert!(read_key_file(&path, "HA_API_KEY").is_err());
    }
}
