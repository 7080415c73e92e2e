//! Language model backend.
//!
//! The conversation loop consumes an abstract [`ModelClient`] that turns a
//! rendered prompt into a stream of text tokens. The shipped implementation
//! talks to an Ollama-compatible server via `/api/generate` in raw mode, so
//! the prompt assembler controls the chat template end to end.

use crate::error::{AssistantError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use tracing::debug;

/// A stream of model tokens. Dropping the stream cancels generation.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Streaming text generation backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start generating a completion for the rendered prompt.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Model`] if the backend cannot be reached.
    /// Mid-stream failures surface as `Err` items on the stream.
    async fn generate(&self, prompt: &str) -> Result<TokenStream>;
}

/// One NDJSON line of an Ollama `/api/generate` streaming response.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Client for an Ollama-compatible generation endpoint.
pub struct OllamaClient {
    base_url: String,
    model: String,
    keep_alive: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client from configuration.
    pub fn new(config: &crate::config::LlmConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            keep_alive: config.keep_alive.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<TokenStream> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
            "raw": true,
            "keep_alive": self.keep_alive,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Model(format!("backend request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Model(format!("backend HTTP error: {e}")))?;

        debug!(model = %self.model, "model stream opened");

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut carry = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk
                    .map_err(|e| AssistantError::Model(format!("backend stream failed: {e}")))?;
                carry.extend_from_slice(&chunk);

                // NDJSON: one complete JSON object per newline.
                while let Some(pos) = carry.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = carry.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: GenerateChunk = serde_json::from_str(line).map_err(|e| {
                        AssistantError::Model(format!("unparseable backend chunk: {e}"))
                    })?;
                    if !parsed.response.is_empty() {
                        yield parsed.response;
                    }
                    if parsed.done {
                        return;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OllamaClient {
        OllamaClient::new(&LlmConfig {
            base_url: server.uri(),
            model: "test-model".to_owned(),
            keep_alive: "2h".to_owned(),
        })
    }

    async fn collect(mut stream: TokenStream) -> Result<String> {
        let mut out = String::new();
        while let Some(token) = stream.next().await {
            out.push_str(&token?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn streams_ndjson_tokens_in_order() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"response\":\"Hello\",\"done\":false}\n",
            "{\"response\":\" world\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "raw": true,
                "stream": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let stream = client_for(&server).generate("prompt").await.expect("open");
        assert_eq!(collect(stream).await.expect("tokens"), "Hello world");
    }

    #[tokio::test]
    async fn backend_500_is_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = match client_for(&server).generate("prompt").await {
            Err(e) => e,
            Ok(_) => panic!("fail"),
        };
        assert!(matches!(err, AssistantError::Model(_)));
    }

    #[tokio::test]
    async fn unparseable_chunk_surfaces_as_stream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("not json\n", "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let stream = client_for(&server).generate("prompt").await.expect("open");
        assert!(collect(stream).await.is_err());
    }
}
