//! Tool registry and dispatch.
//!
//! The registry preserves registration order because the prompt lists
//! tools in that order and small models weight earlier entries more;
//! `close_voice_channel` is registered first for voice sessions.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::{Tool, envelope};
use crate::session::Session;
use crate::stream::ToolCall;

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name
    /// while keeping the original position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        if let Some(&idx) = self.by_name.get(&name) {
            self.order[idx] = tool;
            return;
        }
        self.by_name.insert(name, self.order.len());
        self.order.push(tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&idx| Arc::clone(&self.order[idx]))
    }

    /// Tools visible to a session, in registration order. Voice-only
    /// tools are hidden from text sessions.
    pub fn visible(&self, voice: bool) -> Vec<Arc<dyn Tool>> {
        self.order
            .iter()
            .filter(|t| voice || !t.voice_only())
            .cloned()
            .collect()
    }

    /// Schema entries for the prompt tools block, in registration order.
    pub fn schemas(&self, voice: bool) -> Vec<Value> {
        self.visible(voice)
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.schema(),
                })
            })
            .collect()
    }

    /// Execute a tool call and wrap the outcome in the result envelope.
    ///
    /// Never fails: handler errors become `{"text": "Tool error: …"}`
    /// content, an unknown name becomes `{"text": "Unknown tool"}`.
    pub async fn dispatch(&self, call: &ToolCall, session: &Session) -> Value {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "model requested unknown tool");
            return envelope(&call.name, serde_json::json!({"text": "Unknown tool"}));
        };

        info!(tool = %call.name, session = %session.id, "dispatching tool");
        match tool.execute(&call.parameters, session).await {
            Ok(content) => envelope(&call.name, content),
            Err(e) => {
                warn!(tool = %call.name, "tool failed: {e}");
                envelope(
                    &call.name,
                    serde_json::json!({"text": format!("Tool error: {e}")}),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use crate::session::SessionStore;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, params: &Value, _session: &Session) -> crate::error::Result<Value> {
            Ok(serde_json::json!({"text": params["text"]}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _params: &Value, _session: &Session) -> crate::error::Result<Value> {
            Err(AssistantError::Tool("boom".to_owned()))
        }
    }

    struct VoiceOnlyTool;

    #[async_trait]
    impl Tool for VoiceOnlyTool {
        fn name(&self) -> &str {
            "hang_up"
        }
        fn description(&self) -> &str {
            "Voice only"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn voice_only(&self) -> bool {
            true
        }
        async fn execute(&self, _params: &Value, _session: &Session) -> crate::error::Result<Value> {
            Ok(serde_json::json!({"text": "ok"}))
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(VoiceOnlyTool));
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(FailingTool));
        reg
    }

    #[test]
    fn registration_order_is_preserved() {
        let names: Vec<String> = registry()
            .visible(true)
            .iter()
            .map(|t| t.name().to_owned())
            .collect();
        assert_eq!(names, vec!["hang_up", "echo", "explode"]);
    }

    #[test]
    fn voice_only_tools_hidden_from_text_sessions() {
        let names: Vec<String> = registry()
            .visible(false)
            .iter()
            .map(|t| t.name().to_owned())
            .collect();
        assert_eq!(names, vec!["echo", "explode"]);
    }

    #[tokio::test]
    async fn dispatch_wraps_success_in_envelope() {
        let store = SessionStore::new();
        let session = store.create("s");
        let call = ToolCall {
            name: "echo".to_owned(),
            parameters: serde_json::json!({"text": "hi"}),
        };
        let result = registry().dispatch(&call, &session).await;
        assert_eq!(result["tool_result"]["name"], "echo");
        assert_eq!(result["tool_result"]["content"]["text"], "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_contained() {
        let store = SessionStore::new();
        let session = store.create("s");
        let call = ToolCall {
            name: "nonexistent".to_owned(),
            parameters: serde_json::json!({}),
        };
        let result = registry().dispatch(&call, &session).await;
        assert_eq!(result["tool_result"]["content"]["text"], "Unknown tool");
    }

    #[tokio::test]
    async fn dispatch_handler_error_is_contained() {
        let store = SessionStore::new();
        let session = store.create("s");
        let call = ToolCall {
            name: "explode".to_owned(),
            parameters: serde_json::json!({}),
        };
        let result = registry().dispatch(&call, &session).await;
        let text = result["tool_result"]["content"]["text"]
            .as_str()
            .expect("text");
        assert!(text.starts_with("Tool error:"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn schemas_include_name_description_parameters() {
        let schemas = registry().schemas(false);
        assert_eq!(schemas.len(), 2);
        for schema in &schemas {
            assert!(schema.get("name").is_some());
            assert!(schema.get("description").is_some());
            assert!(schema.get("parameters").is_some());
        }
    }
}
