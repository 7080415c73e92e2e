//! Tool system: named operations the model can invoke mid-stream.
//!
//! Every tool declares a name, description and parameter schema, and
//! returns a free-form JSON content object. The dispatcher wraps each
//! outcome in the uniform `{"tool_result": {...}}` envelope before it is
//! reinjected into the conversation; no error ever escapes.

pub mod behaviour;
pub mod close;
pub mod home;
pub mod math;
pub mod registry;
pub mod search;
pub mod time;
pub mod weather;
pub mod website;

pub use registry::ToolRegistry;

use crate::error::{AssistantError, Result};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;

/// A named operation the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registered name (what the model writes in the call JSON).
    fn name(&self) -> &str;

    /// One-line description rendered into the prompt tools block.
    fn description(&self) -> &str;

    /// JSON Schema for the parameter object.
    fn schema(&self) -> Value;

    /// Whether this tool is only offered to voice sessions.
    fn voice_only(&self) -> bool {
        false
    }

    /// Execute the tool.
    ///
    /// The returned value is the envelope `content`, free-form per tool
    /// but stable for a given tool.
    ///
    /// # Errors
    ///
    /// Errors are converted by the dispatcher into a
    /// `{"text": "Tool error: …"}` content object.
    async fn execute(&self, params: &Value, session: &Session) -> Result<Value>;
}

/// Build the uniform tool-result envelope.
pub fn envelope(name: &str, content: Value) -> Value {
    serde_json::json!({ "tool_result": { "name": name, "content": content } })
}

/// Speak a short UX status line while a tool runs.
///
/// The trailing newline forms an immediate sentence boundary so the
/// status is voiced before the tool's network round-trip completes.
pub async fn status(session: &Session, text: impl Into<String>) {
    let mut line = text.into();
    line.push('\n');
    session.send_chunk(line).await;
}

/// Extract a required string parameter.
pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AssistantError::Tool(format!("missing required parameter '{key}'")))
}

/// Extract an optional string parameter.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Extract a required number, accepting numeric strings the model emits.
pub fn require_f64(params: &Value, key: &str) -> Result<f64> {
    match params.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| AssistantError::Tool(format!("parameter '{key}' is not finite"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| AssistantError::Tool(format!("parameter '{key}' is not a number"))),
        _ => Err(AssistantError::Tool(format!(
            "missing required parameter '{key}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_has_uniform_shape() {
        let value = envelope("get_current_time", serde_json::json!({"text": "04:15PM"}));
        assert_eq!(value["tool_result"]["name"], "get_current_time");
        assert_eq!(value["tool_result"]["content"]["text"], "04:15PM");
    }

    #[test]
    fn require_f64_accepts_numeric_strings() {
        let params = serde_json::json!({"number1": "5", "number2": 2.5});
        assert_eq!(require_f64(&params, "number1").expect("n1"), 5.0);
        assert_eq!(require_f64(&params, "number2").expect("n2"), 2.5);
        assert!(require_f64(&params, "number3").is_err());
    }
}
