//! Voice channel close tool.

use async_trait::async_trait;
use serde_json::Value;

use super::Tool;
use crate::error::Result;
use crate::session::Session;

/// Lets the model end the voice conversation once a request is answered.
///
/// Only registered for voice sessions, and listed first in the prompt so
/// small models reliably find it.
pub struct CloseVoiceChannel;

#[async_trait]
impl Tool for CloseVoiceChannel {
    fn name(&self) -> &str {
        "close_voice_channel"
    }

    fn description(&self) -> &str {
        "Close the voice channel. Only for use when you have answered a user request or the conversation has naturally come to an end."
    }

    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn voice_only(&self) -> bool {
        true
    }

    async fn execute(&self, _params: &Value, session: &Session) -> Result<Value> {
        session.request_close_voice();
        Ok(serde_json::json!({"text": "Voice channel closing"}))
    }
}
