//! Integration tests for the conversation loop with real tools.
//!
//! Drives `process_input` with scripted model turns and verifies the
//! history shape, the tool-result envelopes, and the prompt material
//! that later turns are assembled from.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;

use vesper::core::Assistant;
use vesper::error::Result;
use vesper::llm::{ModelClient, TokenStream};
use vesper::prompt::PromptAssembler;
use vesper::session::{ResponseChunk, Role, Session};
use vesper::store::BehaviourStore;
use vesper::tools::ToolRegistry;
use vesper::tools::behaviour::{ListBehaviour, RemoveBehaviour, UpdateBehaviour};
use vesper::tools::close::CloseVoiceChannel;
use vesper::tools::math::PerformMathOperation;
use vesper::tools::time::GetCurrentTime;

struct ScriptedModel {
    turns: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedModel {
    fn new(turns: &[&[&str]]) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(
                turns
                    .iter()
                    .map(|turn| turn.iter().map(|t| (*t).to_owned()).collect())
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> Result<TokenStream> {
        let tokens = self
            .turns
            .lock()
            .expect("turns lock")
            .pop_front()
            .unwrap_or_default();
        Ok(futures_util::stream::iter(tokens.into_iter().map(Ok)).boxed())
    }
}

struct Fixture {
    assistant: Assistant,
    behaviour: Arc<BehaviourStore>,
    _dir: tempfile::TempDir,
}

fn fixture(model: Arc<dyn ModelClient>) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let behaviour = Arc::new(BehaviourStore::new(dir.path().join("behaviour.json")));
    let prompt = PromptAssembler::new(
        dir.path().join("instructions.txt"),
        dir.path().join("knowledge.txt"),
        Arc::clone(&behaviour),
        None,
    );
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CloseVoiceChannel));
    registry.register(Arc::new(GetCurrentTime));
    registry.register(Arc::new(PerformMathOperation));
    registry.register(Arc::new(UpdateBehaviour::new(Arc::clone(&behaviour))));
    registry.register(Arc::new(RemoveBehaviour::new(Arc::clone(&behaviour))));
    registry.register(Arc::new(ListBehaviour::new(Arc::clone(&behaviour))));
    Fixture {
        assistant: Assistant::new(prompt, registry, model),
        behaviour,
        _dir: dir,
    }
}

async fn drain(session: &Session) -> String {
    let mut rx = session.claim_response_receiver().expect("receiver");
    let mut text = String::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            ResponseChunk::Text(t) => text.push_str(&t),
            ResponseChunk::Done => break,
        }
    }
    text
}

/// Check one input's history slice matches `user (assistant? tool)* assistant?`.
fn assert_turn_shape(roles: &[Role], closed: bool) {
    assert_eq!(roles.first(), Some(&Role::User));
    let mut i = 1;
    while i < roles.len() {
        match roles[i] {
            Role::Assistant if i + 1 < roles.len() => {
                assert_eq!(roles[i + 1], Role::Tool, "assistant mid-input must precede a tool");
                i += 2;
            }
            Role::Assistant => i += 1,
            Role::Tool => i += 1,
            Role::User => panic!("second user turn inside one input"),
        }
    }
    if !closed {
        assert_eq!(roles.last(), Some(&Role::Assistant), "input must end with assistant");
    }
}

#[tokio::test]
async fn division_by_zero_tool_result_lets_the_model_apologize() {
    let model = ScriptedModel::new(&[
        &["{\"name\":\"perform_math_operation\",\"parameters\":{\"operation\":\"division\",\"number1\":5,\"number2\":0}}"],
        &["Sorry, dividing by zero is undefined."],
    ]);
    let fixture = fixture(model);

    fixture
        .assistant
        .process_input("What is 5 divided by 0?", "s1", false)
        .await;
    let session = fixture.assistant.sessions().get("s1").expect("session");
    let history = session.history();

    let tool_turn = history
        .iter()
        .find(|t| t.role == Role::Tool)
        .expect("tool turn");
    let envelope: serde_json::Value =
        serde_json::from_str(&tool_turn.content).expect("envelope json");
    assert_eq!(envelope["tool_result"]["name"], "perform_math_operation");
    assert_eq!(
        envelope["tool_result"]["content"]["text"],
        "Division by zero is undefined."
    );

    let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
    assert_turn_shape(&roles, false);
    assert_eq!(
        history.last().expect("last").content,
        "Sorry, dividing by zero is undefined."
    );
}

#[tokio::test]
async fn behaviour_rule_lands_in_subsequent_prompts() {
    let rule = "Keep voice replies under ten words.";
    let model = ScriptedModel::new(&[
        &[
            "{\"name\":\"update_behaviour\",\"parameters\":{\"rule\":\"Keep voice replies under ten words.\"}}",
        ],
        &["Noted."],
        &["{\"name\":\"list_behaviour\",\"parameters\":{}}"],
        &["You asked me to keep replies short."],
    ]);
    let fixture = fixture(model);

    fixture
        .assistant
        .process_input("From now on keep replies short", "s1", false)
        .await;
    assert_eq!(fixture.behaviour.list(), vec![rule]);

    fixture
        .assistant
        .process_input("What are your standing rules?", "s1", false)
        .await;
    let session = fixture.assistant.sessions().get("s1").expect("session");
    let list_turn = session
        .history()
        .iter()
        .filter(|t| t.role == Role::Tool)
        .nth(1)
        .map(|t| t.content.clone())
        .expect("second tool turn");
    assert!(list_turn.contains(rule));

    // And the prompt preamble carries the override block for future turns.
    let dir = tempfile::tempdir().expect("tempdir");
    let assembler = PromptAssembler::new(
        dir.path().join("instructions.txt"),
        dir.path().join("knowledge.txt"),
        Arc::clone(&fixture.behaviour),
        None,
    );
    let prompt = assembler.assemble(&session.history(), false, &[]).await;
    assert!(prompt.contains("[BEHAVIOUR_OVERRIDES]"));
    assert!(prompt.contains(rule));
}

#[tokio::test]
async fn multi_input_session_keeps_the_role_invariant() {
    let model = ScriptedModel::new(&[
        // Input 1: tool then answer.
        &["{\"name\":\"get_current_time\",\"parameters\":{}}"],
        &["It's late."],
        // Input 2: plain answer.
        &["Good night."],
        // Input 3: prose, tool, answer.
        &["Let me check. ", "{\"name\":\"get_current_time\",\"parameters\":{}}"],
        &["Still late."],
    ]);
    let fixture = fixture(model);

    let inputs = ["what time is it", "thanks", "and now?"];
    let mut boundaries = vec![0usize];
    for input in inputs {
        fixture.assistant.process_input(input, "s1", false).await;
        let session = fixture.assistant.sessions().get("s1").expect("session");
        boundaries.push(session.history().len());
    }

    let session = fixture.assistant.sessions().get("s1").expect("session");
    let roles: Vec<Role> = session.history().iter().map(|t| t.role).collect();
    for window in boundaries.windows(2) {
        assert_turn_shape(&roles[window[0]..window[1]], false);
    }
}

#[tokio::test]
async fn queue_carries_prose_in_order_across_tool_turns() {
    let model = ScriptedModel::new(&[
        &["One moment. ", "{\"name\":\"get_current_time\",\"parameters\":{}}"],
        &["All done."],
    ]);
    let fixture = fixture(model);

    fixture.assistant.process_input("time?", "s1", false).await;
    let session = fixture.assistant.sessions().get("s1").expect("session");
    let text = drain(&session).await;

    let first = text.find("One moment. ").expect("pre-tool prose");
    let status = text.find("Checking Time.").expect("tool status line");
    let last = text.find("All done.").expect("final answer");
    assert!(first < status && status < last, "queue order preserved: {text}");
}
