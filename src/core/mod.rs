//! Conversation runtime.
//!
//! [`Assistant::process_input`] drives one user input to completion:
//! assemble the prompt, stream a model turn through the token splitter
//! into the session's response queue, execute at most one tool call per
//! turn, reinject the wrapped result as a synthetic turn, and repeat
//! until the model produces a tool-free turn or closes the voice channel.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::llm::ModelClient;
use crate::prompt::PromptAssembler;
use crate::session::{Role, Session, SessionStore};
use crate::stream::{TokenSplitter, ToolCall};
use crate::tools::ToolRegistry;

/// Outcome of streaming one model turn.
enum TurnOutcome {
    /// The turn finished without a tool call.
    Completed,
    /// The splitter recognized a tool call; the rest of the turn was abandoned.
    Tool(ToolCall),
    /// Barge-in observed; stop producing prose.
    Cancelled,
    /// The backend failed; an error message was queued.
    Failed,
}

/// The conversation core shared by every surface.
pub struct Assistant {
    sessions: SessionStore,
    prompt: PromptAssembler,
    registry: ToolRegistry,
    model: Arc<dyn ModelClient>,
}

impl Assistant {
    /// Wire the core from its collaborators.
    pub fn new(
        prompt: PromptAssembler,
        registry: ToolRegistry,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            prompt,
            registry,
            model,
        }
    }

    /// The shared session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Process one user input to completion.
    ///
    /// Exactly one conversation loop runs per session at a time; callers
    /// serialize inputs per session. The response queue receives the
    /// streamed prose followed by the terminal sentinel, and `finished`
    /// latches when this returns.
    pub async fn process_input(&self, text: &str, session_id: &str, is_voice: bool) {
        let session = self.sessions.get_or_create(session_id);
        session.finished.clear();
        if is_voice {
            session.clear_close_voice();
        }

        session.push_turn(Role::User, text);
        info!(session = session_id, voice = is_voice, "processing input");

        let tools = self.registry.schemas(is_voice);

        loop {
            let prompt = self
                .prompt
                .assemble(&session.history(), is_voice, &tools)
                .await;

            match self.stream_one_turn(&prompt, &session).await {
                TurnOutcome::Tool(call) => {
                    let result = self.registry.dispatch(&call, &session).await;
                    session.push_turn(Role::Tool, result.to_string());

                    if call.name == "close_voice_channel" {
                        debug!(session = session_id, "voice channel close requested");
                        break;
                    }
                }
                TurnOutcome::Completed | TurnOutcome::Cancelled | TurnOutcome::Failed => break,
            }
        }

        session.send_done().await;
        session.finished.set();
    }

    /// Stream one model turn into the session, splitting prose from tool
    /// JSON. Appends the assistant text to the history as it resolves.
    async fn stream_one_turn(&self, prompt: &str, session: &Session) -> TurnOutcome {
        let mut stream = match self.model.generate(prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session = %session.id, "model backend unavailable: {e}");
                session
                    .send_chunk(format!("\nError processing model response: {e}\n"))
                    .await;
                return TurnOutcome::Failed;
            }
        };

        let mut splitter = TokenSplitter::default();
        let mut prose = String::new();

        let outcome = loop {
            if session.cancelled() {
                debug!(session = %session.id, "response cancelled mid-stream");
                break TurnOutcome::Cancelled;
            }
            let Some(item) = stream.next().await else {
                break TurnOutcome::Completed;
            };
            let token = match item {
                Ok(token) => token,
                Err(e) => {
                    warn!(session = %session.id, "model stream failed: {e}");
                    session
                        .send_chunk(format!("\nError processing model response: {e}\n"))
                        .await;
                    break TurnOutcome::Failed;
                }
            };

            let (visible, tool) = splitter.push(&token);
            if !visible.is_empty() {
                prose.push_str(&visible);
                session.send_chunk(visible).await;
            }
            if let Some(call) = tool {
                break TurnOutcome::Tool(call);
            }
        };

        // The turn's prose (possibly partial, for tool and cancelled
        // turns) becomes the assistant entry; empty turns leave none.
        if !prose.trim().is_empty() {
            session.push_turn(Role::Assistant, prose);
        }
        outcome
    }
}
