//! Voice protocol server.
//!
//! Accepts satellite TCP connections and runs one
//! [`connection::Connection`] state machine per socket. Connections are
//! independent; there is no cross-talk between satellites.

pub mod connection;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::asr::Transcriber;
use crate::config::AssistantConfig;
use crate::core::Assistant;
use crate::error::Result;
use crate::synth::Synthesizer;

/// The satellite-facing TCP server.
pub struct VoiceServer {
    assistant: Arc<Assistant>,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    config: AssistantConfig,
}

impl VoiceServer {
    /// Wire the server from the shared core and speech backends.
    pub fn new(
        assistant: Arc<Assistant>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            assistant,
            transcriber,
            synthesizer,
            config,
        }
    }

    /// Bind the configured address and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.voice.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener (tests bind an ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails fatally.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "voice server listening");

        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("voice server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    info!(%peer, "satellite connected");
                    let connection = connection::Connection::new(
                        Arc::clone(&self.assistant),
                        Arc::clone(&self.transcriber),
                        Arc::clone(&self.synthesizer),
                        self.config.clone(),
                    );
                    tokio::spawn(async move {
                        if let Err(e) = connection.handle(socket).await {
                            warn!(%peer, "connection ended with error: {e}");
                        }
                        info!(%peer, "satellite disconnected");
                    });
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }
}
