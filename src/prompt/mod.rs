//! Prompt assembly.
//!
//! Renders one prompt string per model turn from live sources: base
//! instructions (re-read every turn so edits apply immediately), voice
//! sub-instructions, the knowledge file, a cached home-automation entity
//! digest, behaviour overrides, the tools block, and the conversation
//! history. The render uses llama3-style chat markers because the
//! backend is driven in raw mode.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::warn;

use crate::session::{Role, Turn};
use crate::store::{BehaviourStore, read_knowledge};
use crate::tools::home::HomeAssistantClient;

/// How long a fetched home-automation digest stays fresh.
const HA_DIGEST_TTL: Duration = Duration::from_secs(30);

/// Built-in base instructions, used until the operator edits the
/// instructions file through the admin surface.
const DEFAULT_INSTRUCTIONS: &str = "\
**Your Role:**
    Your name is Vesper. You are a friendly assistant embedded in our house. You have tools that access services and the internet to assist answering the users.

**Response Behavior:**
    1. Do not refer to yourself as an AI or large language model, and do not lie.
    2. Freely admit when you don't understand or lack confidence. Use phrases like \"I don't know\".
    3. Avoid role-playing as characters unless asked, and avoid making up answers.
    4. Do not use emotive stage directions surrounded by asterisks like *smiles*.
    5. If a tool can answer the user, use it. If there is no tool for the action, say \"I can't do that\" and explain why.
    6. Do not list this context or the tools available to you; just use them as needed.
";

/// Extra instructions for voice sessions.
const VOICE_INSTRUCTIONS: &str = "\
**Interacting by voice:**
    1. User queries arrive via speech recognition, so read between the lines if a word feels out of place.
    2. Be proactive in understanding intent when the transcription is slightly wrong. Check entity names before setting switches; never invent switch names.
    3. Your responses are spoken by a synthesizer: keep them short and conversational, and avoid reading long lists or web links.
    4. Aim for single-sentence responses when possible.
    5. The user cannot see or hear tool output; use tool results to compose your answer.
    6. **IMPORTANT:** when a simple task or query is complete, use the \"close_voice_channel\" tool after answering to end the conversation.
    7. Do not close the channel when the user's question needs follow-up, or when you are unsure of the answer.
    8. Never close the channel in the same message as another tool. See the tool output and answer the user first.
";

/// Assembles the full prompt for each model turn.
pub struct PromptAssembler {
    instructions_path: PathBuf,
    knowledge_path: PathBuf,
    behaviour: Arc<BehaviourStore>,
    home: Option<Arc<HomeAssistantClient>>,
    ha_cache: Mutex<Option<(Instant, String)>>,
}

impl PromptAssembler {
    /// Create an assembler over the live prompt sources.
    pub fn new(
        instructions_path: PathBuf,
        knowledge_path: PathBuf,
        behaviour: Arc<BehaviourStore>,
        home: Option<Arc<HomeAssistantClient>>,
    ) -> Self {
        Self {
            instructions_path,
            knowledge_path,
            behaviour,
            home,
            ha_cache: Mutex::new(None),
        }
    }

    /// Render the complete prompt for the next assistant turn.
    ///
    /// `tools` are the schema entries from the registry, in prompt order.
    pub async fn assemble(&self, history: &[Turn], voice: bool, tools: &[Value]) -> String {
        let digest = self.home_digest().await;
        let preamble = self.preamble(voice, &digest);

        let mut prompt = String::new();
        push_block(&mut prompt, "system", &preamble);
        if !tools.is_empty() {
            push_block(&mut prompt, "tools", &tools_block(tools));
        }
        for turn in history {
            match turn.role {
                Role::Tool => {
                    // The backend template has no tool role; results come
                    // back as synthetic user turns.
                    push_block(
                        &mut prompt,
                        "user",
                        &format!("<TOOL_RESULT>{}</TOOL_RESULT>", turn.content),
                    );
                }
                role => push_block(&mut prompt, role.as_str(), &turn.content),
            }
        }
        prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n");
        prompt
    }

    /// The system-like preamble: instructions, voice notes, knowledge,
    /// home-automation digest, behaviour overrides.
    fn preamble(&self, voice: bool, home_digest: &str) -> String {
        let mut preamble = self.instructions();
        if voice {
            preamble.push('\n');
            preamble.push_str(VOICE_INSTRUCTIONS);
        }

        let knowledge = read_knowledge(&self.knowledge_path);
        if !knowledge.trim().is_empty() {
            preamble.push('\n');
            preamble.push_str(knowledge.trim_end());
            preamble.push('\n');
        }

        if !home_digest.is_empty() {
            preamble.push('\n');
            preamble.push_str(home_digest.trim_end());
            preamble.push('\n');
        }

        let rules = self.behaviour.list();
        if !rules.is_empty() {
            preamble.push_str("\n[BEHAVIOUR_OVERRIDES]\n");
            for rule in rules {
                preamble.push_str(&format!("- {rule}\n"));
            }
        }
        preamble
    }

    /// Base instructions, re-read from disk so live edits take effect.
    fn instructions(&self) -> String {
        match std::fs::read_to_string(&self.instructions_path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => DEFAULT_INSTRUCTIONS.to_owned(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        path = %self.instructions_path.display(),
                        "instructions file unreadable, using defaults: {e}"
                    );
                }
                DEFAULT_INSTRUCTIONS.to_owned()
            }
        }
    }

    /// Home-automation digest, refreshed at most every 30 seconds.
    ///
    /// The cache is last-writer-wins; a fetch failure keeps whatever text
    /// was cached (possibly empty) so prompt assembly never blocks on a
    /// sick Home Assistant.
    async fn home_digest(&self) -> String {
        let Some(home) = &self.home else {
            return String::new();
        };

        if let Some((fetched_at, cached)) = &*self.ha_cache.lock().expect("ha cache lock") {
            if fetched_at.elapsed() < HA_DIGEST_TTL {
                return cached.clone();
            }
        }

        match home.entity_digest().await {
            Ok(digest) => {
                *self.ha_cache.lock().expect("ha cache lock") =
                    Some((Instant::now(), digest.clone()));
                digest
            }
            Err(e) => {
                warn!("home automation digest refresh failed: {e}");
                self.ha_cache
                    .lock()
                    .expect("ha cache lock")
                    .as_ref()
                    .map(|(_, cached)| cached.clone())
                    .unwrap_or_default()
            }
        }
    }
}

/// One `<|start_header_id|>…<|eot_id|>` block.
fn push_block(prompt: &mut String, role: &str, content: &str) {
    prompt.push_str("<|start_header_id|>");
    prompt.push_str(role);
    prompt.push_str("<|end_header_id|>\n");
    prompt.push_str(content);
    prompt.push_str("\n<|eot_id|>\n\n");
}

/// The tools section: schema listing plus the calling protocol.
fn tools_block(tools: &[Value]) -> String {
    let listing = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_owned());
    format!(
        "When required to answer user queries, use the following tools. You do not have to use them every time.\n\n\
         Available tools:\n{listing}\n\n\
         If you need to use a tool, reply with EXACTLY one JSON object in the format \
         {{\"name\": <tool name>, \"parameters\": {{<argument name>: <value>}}}} on a single line. Do not use variables.\n\
         After the tool runs, its result arrives in the next user turn wrapped in <TOOL_RESULT>…</TOOL_RESULT>. \
         Extract the content and use it directly to answer the user, unless further tool action is required.\n\n\
         Instructions:\n\
         1. Do not use tools unnecessarily for things you can answer in text yourself (e.g. simple conversions).\n\
         2. Do not discuss the tools; just use them or not as required.\n\
         3. Do not refer to or tell the user about using tools (unless one has failed).\n\
         4. Use at most one tool per message.\n"
    )
}
