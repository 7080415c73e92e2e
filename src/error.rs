//! Error types for the assistant server.

/// Top-level error type for the voice assistant.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Malformed or truncated wire frame. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Audio capture or transcription error. Confined to the utterance.
    #[error("capture error: {0}")]
    Capture(String),

    /// Speech synthesis error. Confined to the sentence.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Model backend connection or stream decode error.
    #[error("model stream error: {0}")]
    Model(String),

    /// Tool execution error. Wrapped into a tool result by the dispatcher.
    #[error("tool error: {0}")]
    Tool(String),

    /// Knowledge or behaviour file read/write error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
