//! Streaming chat endpoint.
//!
//! `POST /api/chat` runs one conversation turn and streams the
//! assistant's text incrementally as SSE events, mirroring what a voice
//! satellite would hear. Browser tabs keep their session id between
//! requests to continue a conversation.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use futures_util::stream::Stream;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::core::Assistant;
use crate::session::ResponseChunk;

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,
    /// Session to continue; omitted for a fresh conversation.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Build the chat router.
pub fn router(assistant: Arc<Assistant>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .with_state(assistant)
}

async fn chat(
    State(assistant): State<Arc<Assistant>>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let session = assistant.sessions().get_or_create(&session_id);

    // Claimed for the duration of the stream; released when the SSE body
    // finishes (or the client goes away), so the tab can send again.
    let Some(mut queue) = session.claim_response_receiver() else {
        // A second request raced onto the same session mid-turn.
        return Err(StatusCode::CONFLICT);
    };

    debug!(session = %session_id, "chat input received");
    {
        let assistant = Arc::clone(&assistant);
        let session_id = session_id.clone();
        let message = request.message;
        tokio::spawn(async move {
            assistant.process_input(&message, &session_id, false).await;
        });
    }

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(async_stream::stream! {
            yield Ok(Event::default().event("session").data(session_id));
            while let Some(chunk) = queue.recv().await {
                match chunk {
                    ResponseChunk::Text(text) => {
                        yield Ok(Event::default().event("delta").data(text));
                    }
                    ResponseChunk::Done => {
                        yield Ok(Event::default().event("done").data(""));
                        break;
                    }
                }
            }
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::{ModelClient, TokenStream};
    use crate::prompt::PromptAssembler;
    use crate::store::BehaviourStore;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use futures_util::StreamExt;

    struct CannedModel;

    #[async_trait]
    impl ModelClient for CannedModel {
        async fn generate(&self, _prompt: &str) -> Result<TokenStream> {
            let tokens = ["Hello ", "from ", "chat."].map(str::to_owned);
            Ok(futures_util::stream::iter(tokens.into_iter().map(Ok)).boxed())
        }
    }

    fn test_assistant(dir: &tempfile::TempDir) -> Arc<Assistant> {
        let behaviour = Arc::new(BehaviourStore::new(dir.path().join("behaviour.json")));
        let prompt = PromptAssembler::new(
            dir.path().join("instructions.txt"),
            dir.path().join("knowledge.txt"),
            behaviour,
            None,
        );
        Arc::new(Assistant::new(prompt, ToolRegistry::new(), Arc::new(CannedModel)))
    }

    #[tokio::test]
    async fn chat_streams_deltas_and_done() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = router(test_assistant(&dir));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let body = reqwest::Client::new()
            .post(format!("http://{addr}/api/chat"))
            .json(&serde_json::json!({"message": "hi"}))
            .send()
            .await
            .expect("request")
            .text()
            .await
            .expect("body");

        assert!(body.contains("event: session"));
        assert!(body.contains("data: Hello "));
        assert!(body.contains("event: done"));
    }

    #[tokio::test]
    async fn chat_session_carries_across_requests() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assistant = test_assistant(&dir);
        let app = router(Arc::clone(&assistant));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let client = reqwest::Client::new();
        for message in ["first", "second"] {
            let response = client
                .post(format!("http://{addr}/api/chat"))
                .json(&serde_json::json!({"message": message, "session_id": "tab-1"}))
                .send()
                .await
                .expect("request");
            assert_eq!(response.status(), 200);
            response.text().await.expect("drain");
        }

        let session = assistant.sessions().get("tab-1").expect("session");
        assert_eq!(session.history().len(), 4);
    }
}
