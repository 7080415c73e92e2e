//! Current-time tool.

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, status};
use crate::error::Result;
use crate::session::Session;

/// Reports the local wall-clock time in 12-hour format.
pub struct GetCurrentTime;

#[async_trait]
impl Tool for GetCurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current time"
    }

    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: &Value, session: &Session) -> Result<Value> {
        status(session, "Checking Time.").await;
        let now = chrono::Local::now().format("%I:%M%p");
        Ok(serde_json::json!({"text": format!("current time: {now}")}))
    }
}
